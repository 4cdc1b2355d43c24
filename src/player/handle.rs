use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

use crate::model::SessionResult;

use super::{MountSurface, PlaybackState, Player, ReplayError};

/// Commands to a player running on a background task
#[derive(Debug)]
pub enum PlayerCommand {
    Load(Box<SessionResult>),
    Play,
    Pause,
    Resume,
    Stop,
    Rewind(usize),
    RewindPercent(f64),
    InterruptSeeking,
    SetSpeed(u32),
    SetFastForwardThreshold(u64),
    Status(oneshot::Sender<PlayerStatus>),
    Shutdown,
}

/// Point-in-time view of a running player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub position: usize,
    pub records: usize,
    pub progress: f64,
    pub pointer: (f64, f64),
    pub hint: Option<String>,
    /// Markup of the mounted document.
    pub markup: String,
}

/// Handle to control a background player
#[derive(Clone)]
pub struct PlayerHandle {
    cmd_tx: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    /// Move `player` onto a tokio task and return a handle to it.
    ///
    /// Events keep flowing on the receiver returned by [`Player::new`].
    pub fn spawn<S: MountSurface + 'static>(player: Player<S>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = PlayerDriver {
            player,
            cmd_rx,
            started: Instant::now(),
        };
        tokio::spawn(driver.run());
        Self { cmd_tx }
    }

    fn send(&self, command: PlayerCommand) {
        if self.cmd_tx.send(command).is_err() {
            tracing::debug!("player task already shut down");
        }
    }

    pub fn load(&self, session: SessionResult) {
        self.send(PlayerCommand::Load(Box::new(session)));
    }

    pub fn play(&self) {
        self.send(PlayerCommand::Play);
    }

    pub fn pause(&self) {
        self.send(PlayerCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(PlayerCommand::Resume);
    }

    pub fn stop(&self) {
        self.send(PlayerCommand::Stop);
    }

    pub fn rewind(&self, index: usize) {
        self.send(PlayerCommand::Rewind(index));
    }

    pub fn rewind_percent(&self, fraction: f64) {
        self.send(PlayerCommand::RewindPercent(fraction));
    }

    pub fn interrupt_seeking(&self) {
        self.send(PlayerCommand::InterruptSeeking);
    }

    pub fn set_speed(&self, speed: u32) {
        self.send(PlayerCommand::SetSpeed(speed));
    }

    pub fn set_fast_forward_threshold(&self, threshold_ms: u64) {
        self.send(PlayerCommand::SetFastForwardThreshold(threshold_ms));
    }

    /// Current status, or `None` once the task is gone.
    pub async fn status(&self) -> Option<PlayerStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(PlayerCommand::Status(tx)).ok()?;
        rx.await.ok()
    }

    /// Stop playback and end the task.
    pub fn shutdown(&self) {
        self.send(PlayerCommand::Shutdown);
    }
}

struct PlayerDriver<S: MountSurface> {
    player: Player<S>,
    cmd_rx: mpsc::UnboundedReceiver<PlayerCommand>,
    started: Instant,
}

impl<S: MountSurface> PlayerDriver<S> {
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// At most one wake-up is pending at a time. Commands are handled first,
    /// so a pause or stop always lands before a tick that is due.
    async fn run(mut self) {
        loop {
            let deadline = self
                .player
                .next_deadline()
                .map(|ms| self.started + Duration::from_millis(ms));
            let wake = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                command = self.cmd_rx.recv() => match command {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    let now = self.now();
                    log_failure(self.player.poll(now));
                }
            }
        }
        self.player.stop();
        tracing::debug!("player task finished");
    }

    async fn handle(&mut self, command: PlayerCommand) {
        let now = self.now();
        match command {
            PlayerCommand::Load(session) => self.player.load(*session),
            PlayerCommand::Play => log_failure(self.player.play(now).await),
            PlayerCommand::Pause => self.player.pause(),
            PlayerCommand::Resume => self.player.resume(now),
            PlayerCommand::Stop => self.player.stop(),
            PlayerCommand::Rewind(index) => log_failure(self.player.rewind(index, now).await),
            PlayerCommand::RewindPercent(fraction) => {
                log_failure(self.player.rewind_percent(fraction, now).await)
            }
            PlayerCommand::InterruptSeeking => self.player.interrupt_seeking(now),
            PlayerCommand::SetSpeed(speed) => self.player.set_speed(speed),
            PlayerCommand::SetFastForwardThreshold(ms) => self.player.set_fast_forward_threshold(ms),
            PlayerCommand::Status(reply) => {
                let overlay = self.player.overlay();
                let status = PlayerStatus {
                    state: self.player.state(),
                    position: self.player.position(),
                    records: self.player.records_len(),
                    progress: self.player.progress(),
                    pointer: overlay.pointer(),
                    hint: overlay.hint().map(str::to_string),
                    markup: self.player.document().to_markup(self.player.document().root()),
                };
                let _ = reply.send(status);
            }
            PlayerCommand::Shutdown => {}
        }
    }
}

/// Failures were already reported as events; this only leaves a trace.
fn log_failure(result: Result<(), ReplayError>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "player command failed");
    }
}
