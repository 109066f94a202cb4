use std::path::Path;

use anyhow::Context as _;

use crate::cli::InitArgs;

pub(crate) const WORKLOAD_TEMPLATE: &str = r#"# loadgate workload
#
#   loadgate run loadgate.yaml
#
# Command-line flags override anything set here.
name: hand-probability

vus: 100
duration: 10s
# iterations: 1000       # shared cap across all VUs
# thinkTime: 100ms
# gracefulStop: 30s
#
# Ramp instead of a fixed VU count (replaces `vus`):
# startVUs: 0
# ramp: stepped           # or linear
# stages:
#   - { duration: 30s, target: 50 }
#   - { duration: 1m, target: 100 }

request:
  method: POST
  url: http://localhost:8081/hand/probability
  headers:
    Content-Type: application/json
  body: '{"hole":["HA","SA"],"community":[],"num_players":5,"simulations":10000}'
  # timeout: 5s
  # attempts: 1

checks:
  - name: is status 200
    status: 200

thresholds:
  http_req_duration: ["p(95)<500"]
  # http_req_failed:
  #   - threshold: rate<0.01
  #     abortOnFail: true
"#;

pub async fn init(args: InitArgs) -> anyhow::Result<()> {
    let root = &args.dir;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create dir: {}", root.display()))?;

    let path = root.join(&args.file);
    write_new_file(&path, WORKLOAD_TEMPLATE, args.force).await?;
    println!("created {}", path.display());
    Ok(())
}

async fn write_new_file(path: &Path, contents: &str, force: bool) -> anyhow::Result<()> {
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("failed to check file existence: {}", path.display()))?;
    if exists && !force {
        anyhow::bail!(
            "refusing to overwrite existing file (use --force): {}",
            path.display()
        );
    }

    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write file: {}", path.display()))
}
