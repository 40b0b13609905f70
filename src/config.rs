use crate::types::Config;
use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when the file is absent. A present but broken file is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.session_expiry_s <= 0.0 {
            bail!("session.session_expiry_s must be positive");
        }
        if self.session.render_grace_s < 0.0 {
            bail!("session.render_grace_s must not be negative");
        }
        if self.alert.alert_cooldown_s < 0.0 {
            bail!("alert.alert_cooldown_s must not be negative");
        }
        if self.posture.knee_angle_min_deg >= self.posture.knee_angle_max_deg {
            bail!("posture.knee_angle_min_deg must be below knee_angle_max_deg");
        }
        if self.posture.hip_knee_min_px >= self.posture.hip_knee_max_px {
            bail!("posture.hip_knee_min_px must be below hip_knee_max_px");
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        let hours = self.runtime.utc_offset_hours;
        FixedOffset::east_opt(hours * 3600)
            .with_context(|| format!("runtime.utc_offset_hours out of range: {}", hours))
    }
}
