//! WAN emulation profile rendered as `tc netem` parameters.

/// Fixed delay/loss profile applied to a session's emulated uplinks.
///
/// Optional parameters left as `None` are not passed to `tc`.
#[derive(Debug, Clone, PartialEq)]
pub struct WanProfile {
    pub delay_ms: u32,
    pub jitter_ms: Option<u32>,
    pub loss_percent: f32,
    pub loss_correlation: Option<f32>,
    /// Adds serialization delay only (netem `rate`), no policing.
    pub rate_kbit: Option<u64>,
}

impl Default for WanProfile {
    fn default() -> Self {
        Self {
            delay_ms: 50,
            jitter_ms: Some(10),
            loss_percent: 1.0,
            loss_correlation: None,
            rate_kbit: None,
        }
    }
}

impl WanProfile {
    /// Build the netem parameter list (delay, loss, rate).
    pub fn netem_args(&self) -> Vec<String> {
        let mut args = vec!["delay".to_string(), format!("{}ms", self.delay_ms)];
        if let Some(jitter) = self.jitter_ms
            && jitter > 0
        {
            args.push(format!("{jitter}ms"));
        }

        if self.loss_percent > 0.0 {
            args.push("loss".into());
            args.push(format!("{}%", self.loss_percent));
            if let Some(corr) = self.loss_correlation {
                args.push(format!("{corr}%"));
            }
        }

        if let Some(rate) = self.rate_kbit {
            args.extend(["rate".into(), format!("{rate}kbit")]);
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_args() {
        assert_eq!(
            WanProfile::default().netem_args(),
            ["delay", "50ms", "10ms", "loss", "1%"]
        );
    }

    #[test]
    fn test_zero_loss_and_jitter_are_omitted() {
        let profile = WanProfile {
            delay_ms: 20,
            jitter_ms: Some(0),
            loss_percent: 0.0,
            loss_correlation: Some(25.0),
            rate_kbit: Some(5000),
        };
        assert_eq!(profile.netem_args(), ["delay", "20ms", "rate", "5000kbit"]);
    }

    #[test]
    fn test_loss_correlation_follows_loss() {
        let profile = WanProfile {
            loss_percent: 2.5,
            loss_correlation: Some(25.0),
            jitter_ms: None,
            ..Default::default()
        };
        assert_eq!(
            profile.netem_args(),
            ["delay", "50ms", "loss", "2.5%", "25%"]
        );
    }
}
