use std::path::Path;
use std::process::Command;

use rex_media::{check_program, NativeBridge};
use rex_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with storage_root={}",
        config.storage_root.display()
    );
    ensure_storage(&config.storage_root.join(&config.export_dir)).await?;
    ensure_tool(&config.tools.ffmpeg)?;
    ensure_tool(&config.tools.ffprobe)?;
    ensure_helper(NativeBridge::from_env().helper_path())?;
    ensure_any_env_present(&["REDIS_URL", "REDIS_HOST"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_storage(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_tool(program: &Path) -> anyhow::Result<()> {
    let resolved = check_program(program)?;
    let output = Command::new(&resolved)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", resolved.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            resolved.display(),
            output.status
        ));
    }
    println!("worker-selfcheck: found {}", resolved.display());
    Ok(())
}

fn ensure_helper(helper: &Path) -> anyhow::Result<()> {
    if !helper.is_file() {
        return Err(anyhow::anyhow!(
            "native helper missing at {} (set NATIVE_HELPER_PATH)",
            helper.display()
        ));
    }
    Ok(())
}

fn ensure_any_env_present(vars: &[&str]) -> anyhow::Result<()> {
    if vars.iter().any(|var| std::env::var(var).is_ok()) {
        return Ok(());
    }
    Err(anyhow::anyhow!("missing required env var, one of {}", vars.join(", ")))
}
