//! Write-then-verify cycle for configuration changes

use tracing::{debug, info, warn};

use crate::{
    config::ProtocolSettings,
    core::{
        error::{ProtocolError, ProtocolResult},
        fetcher::ConfigFetcher,
        types::{ApplyOutcome, ConfigDiff, DeviceConfiguration, DeviceSettings, mismatched_fields},
    },
    protocol::Command,
    transport::SerialTransport,
};

/// Result of an apply cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    /// Fields that differed from the baseline
    pub diff: ConfigDiff,
    /// Configuration read back after the restart, if any
    pub reported: Option<DeviceConfiguration>,
}

/// Writes a configuration, reboots the device and reads it back
pub struct ConfigApplier<'a, T: SerialTransport> {
    transport: &'a T,
    settings: &'a ProtocolSettings,
}

impl<'a, T: SerialTransport> ConfigApplier<'a, T> {
    pub fn new(transport: &'a T, settings: &'a ProtocolSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Apply `proposed` on top of `baseline`
    ///
    /// An empty diff returns [`ApplyOutcome::NoChange`] without touching the
    /// transport. Otherwise the whole proposed object is written, never just
    /// the diff. Transport errors while writing are returned as errors; the
    /// device state is unknown afterwards.
    pub async fn apply(
        &self,
        baseline: &DeviceSettings,
        proposed: &DeviceSettings,
    ) -> ProtocolResult<ApplyReport> {
        let diff = ConfigDiff::between(baseline, proposed)?;
        if diff.is_empty() {
            debug!("Proposed configuration equals baseline, nothing to write");
            return Ok(ApplyReport {
                outcome: ApplyOutcome::NoChange,
                diff,
                reported: None,
            });
        }

        info!(
            "Writing configuration ({} changed: {})",
            diff.len(),
            diff.fields().collect::<Vec<_>>().join(", ")
        );
        self.send(Command::WriteConfig(proposed.clone())).await?;
        self.send(Command::Restart).await?;

        debug!(
            "Waiting {:?} for the device to reboot",
            self.settings.settle_delay
        );
        tokio::time::sleep(self.settings.settle_delay).await;

        let reported = match ConfigFetcher::new(self.transport, self.settings.verify)
            .fetch()
            .await
        {
            Ok(reported) => reported,
            Err(ProtocolError::RetryBudgetExhausted { attempts, last }) => {
                warn!(
                    "Device did not report its configuration after reboot ({} attempts, last error: {})",
                    attempts, last
                );
                return Ok(ApplyReport {
                    outcome: ApplyOutcome::VerifyFailed,
                    diff,
                    reported: None,
                });
            }
            Err(e) => return Err(e),
        };

        let fields = mismatched_fields(proposed, &reported)?;
        let outcome = if fields.is_empty() {
            info!(
                "Configuration verified (firmware {})",
                reported.firmware_label()
            );
            ApplyOutcome::Applied
        } else {
            warn!("Device reports different values for: {}", fields.join(", "));
            ApplyOutcome::Mismatch { fields }
        };

        Ok(ApplyReport {
            outcome,
            diff,
            reported: Some(reported),
        })
    }

    async fn send(&self, command: Command) -> ProtocolResult<()> {
        debug!("Sending {}", command);
        let line = command.encode()?;
        self.transport.write(&line).await?;
        Ok(())
    }
}
