use crate::error::{ReadinessError, Result};

/// Names the release that came before a given one.
pub trait ReleaseResolver: Send + Sync {
    fn previous_release(&self, release: &str) -> Result<String>;
}

/// `<major>.<minor>` releases where the predecessor is `<major>.<minor - 1>`.
///
/// A `.0` release has no predecessor within its major version and resolves
/// to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinorReleaseResolver;

fn parse_release(release: &str) -> Result<(u32, u32)> {
    let (major, minor) = release
        .trim()
        .split_once('.')
        .ok_or_else(|| ReadinessError::ReleaseParse(release.to_string()))?;
    let major = major
        .parse::<u32>()
        .map_err(|_| ReadinessError::ReleaseParse(release.to_string()))?;
    let minor = minor
        .parse::<u32>()
        .map_err(|_| ReadinessError::ReleaseParse(release.to_string()))?;
    Ok((major, minor))
}

impl ReleaseResolver for MinorReleaseResolver {
    fn previous_release(&self, release: &str) -> Result<String> {
        let (major, minor) = parse_release(release)?;
        if minor == 0 {
            return Ok(release.to_string());
        }
        Ok(format!("{}.{}", major, minor - 1))
    }
}
