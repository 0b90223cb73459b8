//! Version and build information
//!
//! Values are embedded at compile time by `build.rs`.

use std::fmt;

use serde::Serialize;

/// Build information embedded at compile time
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    /// Package version from Cargo.toml
    pub version: &'static str,
    /// Package name
    pub name: &'static str,
    /// Git commit hash (short)
    pub git_hash: &'static str,
    /// Whether the working tree had uncommitted changes
    pub git_dirty: bool,
    /// Build timestamp
    pub build_timestamp: &'static str,
    /// Target triple
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

impl BuildInfo {
    /// Get the current build information
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: env!("CARGO_PKG_NAME"),
            git_hash: env!("AUTOGLM_GIT_HASH"),
            git_dirty: env!("AUTOGLM_GIT_DIRTY") == "true",
            build_timestamp: env!("AUTOGLM_BUILD_TIMESTAMP"),
            target: env!("AUTOGLM_TARGET"),
            profile: env!("AUTOGLM_PROFILE"),
        }
    }

    /// Full version string (e.g., "0.1.0-abc1234")
    pub fn full_version(&self) -> String {
        if self.git_dirty {
            format!("{}-{}-dirty", self.version, self.git_hash)
        } else {
            format!("{}-{}", self.version, self.git_hash)
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "  Version:  {}", self.version)?;
        let dirty = if self.git_dirty { " (dirty)" } else { "" };
        writeln!(f, "  Git Hash: {}{}", self.git_hash, dirty)?;
        writeln!(f, "  Built:    {}", self.build_timestamp)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Profile:  {}", self.profile)?;
        Ok(())
    }
}

/// Print version information to stdout
pub fn print_version() {
    print!("{}", BuildInfo::current());
}
