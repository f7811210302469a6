use std::sync::Arc;

use log::{debug, warn};

use callcore::{Loops, Tone, ToneCommand};

use crate::ports::TonePlayer;

/// Drives the tone player from reconciliation output, restarting a tone only
/// when a different one is requested.
pub struct ToneController {
    player: Arc<dyn TonePlayer>,
    current: Option<Tone>,
}

impl ToneController {
    pub fn new(player: Arc<dyn TonePlayer>) -> Self {
        Self {
            player,
            current: None,
        }
    }

    pub fn current(&self) -> Option<Tone> {
        self.current
    }

    pub async fn apply(&mut self, command: ToneCommand) {
        match command {
            ToneCommand::Play(tone) => {
                let spec = tone.spec();
                // Only a looping tone is still audible when asked for again.
                if self.current == Some(tone) && spec.loops == Loops::Infinite {
                    return;
                }
                let loops = match spec.loops {
                    Loops::Infinite => None,
                    Loops::Count(n) => Some(n),
                };
                debug!(target: "Call/Tone", "Playing {:?} ({}, loops {:?})", tone, spec.resource, loops);
                self.current = Some(tone);
                if let Err(e) = self.player.play(spec.resource, loops).await {
                    warn!(target: "Call/Tone", "Failed to play {}: {e}", spec.resource);
                }
            }
            ToneCommand::Stop => self.stop().await,
        }
    }

    pub async fn stop(&mut self) {
        if self.current.take().is_some() {
            debug!(target: "Call/Tone", "Stopping tone");
            if let Err(e) = self.player.stop().await {
                warn!(target: "Call/Tone", "Failed to stop tone: {e}");
            }
        }
    }
}
