use anyhow::{Context, Result, bail};
use jarctl_core::{HttpReleaseSource, ManagerConfig, ReleaseSource};
use jarctl_core::release::normalize_version;
use semver::Version;
use tracing::{debug, info};

use super::setup::write_executable_atomic;

pub async fn exec(config: &ManagerConfig) -> Result<()> {
    let url = config
        .self_update_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .context("self_update_url is not configured")?;
    let suffix = platform_suffix(std::env::consts::OS, std::env::consts::ARCH)?;

    let source = HttpReleaseSource::new(Some(url.to_string()), suffix, config)?;
    let release = source
        .latest()
        .await
        .context("Failed to resolve the latest jarctl release")?;

    let current = env!("CARGO_PKG_VERSION");
    if !is_outdated_version(current, &release.version) {
        debug!("latest published release is {}", release.version);
        println!("jarctl {current} is up to date.");
        return Ok(());
    }

    let exe = std::env::current_exe().context("Failed to resolve jarctl path")?;
    let staged = exe.with_file_name(".jarctl.download");
    source.download(&release, &staged).await?;
    let bytes = tokio::fs::read(&staged)
        .await
        .with_context(|| format!("Failed to read {}", staged.display()))?;
    let _ = tokio::fs::remove_file(&staged).await;

    write_executable_atomic(&exe, &bytes)?;
    info!("replaced {}", exe.display());
    println!(
        "Updated jarctl {current} -> {}.",
        normalize_version(&release.version)
    );
    Ok(())
}

/// Release assets are named `jarctl-<version>-<arch>-<os>`.
fn platform_suffix(os: &str, arch: &str) -> Result<String> {
    let arch = match arch {
        "x86_64" | "amd64" => "x86_64",
        "aarch64" | "arm64" => "aarch64",
        other => bail!("unsupported architecture '{other}' for self-update"),
    };
    match os {
        "linux" | "macos" => Ok(format!("{arch}-{os}")),
        other => bail!("self-update is not supported on {other}"),
    }
}

fn is_outdated_version(current: &str, latest: &str) -> bool {
    let current_norm = normalize_version(current);
    let latest_norm = normalize_version(latest);
    match (Version::parse(&current_norm), Version::parse(&latest_norm)) {
        (Ok(current_semver), Ok(latest_semver)) => current_semver < latest_semver,
        _ => current_norm != latest_norm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outdated_version_uses_semver_when_possible() {
        assert!(is_outdated_version("0.1.0", "v0.2.0"));
        assert!(!is_outdated_version("0.2.0", "v0.2.0"));
        assert!(!is_outdated_version("0.3.0", "0.2.9"));
        assert!(is_outdated_version("0.1.0", "nightly"));
    }

    #[test]
    fn platform_suffix_normalizes_arch() {
        assert_eq!(platform_suffix("linux", "amd64").unwrap(), "x86_64-linux");
        assert_eq!(platform_suffix("macos", "arm64").unwrap(), "aarch64-macos");
        assert!(platform_suffix("windows", "x86_64").is_err());
        assert!(platform_suffix("linux", "riscv64").is_err());
    }
}
