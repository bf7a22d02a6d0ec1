use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::controller::PositionController;

struct PollLoop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollLoop {
    /// Signal the loop to exit once its current read, if any, has finished
    fn stop(self) {
        self.stop.send_replace(true);
    }
}

struct PollState {
    interval: Duration,
    enabled: bool,
    task: Option<PollLoop>,
}

/// Periodic position refresh
///
/// While enabled, a background task reads the position and then sleeps
/// for the interval, until stopped. Stopping only interrupts the sleep: a
/// read already in flight runs to completion, including its disconnect.
/// At most one loop is scheduled at a time.
pub struct PollScheduler {
    controller: PositionController,
    state: Arc<Mutex<PollState>>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler").finish_non_exhaustive()
    }
}

impl PollScheduler {
    /// Create a stopped scheduler
    pub fn new(controller: PositionController, interval: Duration) -> Self {
        Self {
            controller,
            state: Arc::new(Mutex::new(PollState {
                interval,
                enabled: false,
                task: None,
            })),
        }
    }

    /// Start polling every `interval`, replacing any running loop
    ///
    /// The first read happens immediately.
    pub async fn start(&self, interval: Duration) {
        let mut state = self.state.lock().await;
        state.interval = interval;
        state.enabled = true;
        self.spawn_locked(&mut state);
    }

    /// Stop polling
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.enabled = false;
        if let Some(task) = state.task.take() {
            task.stop();
            info!("Polling stopped");
        }
    }

    /// Change the interval
    ///
    /// A running loop is restarted with the new interval; a stopped
    /// scheduler only remembers it.
    pub async fn reconfigure(&self, interval: Duration) {
        let mut state = self.state.lock().await;
        state.interval = interval;
        debug!("Polling interval changed to {:?}", interval);
        if state.enabled {
            self.spawn_locked(&mut state);
        }
    }

    /// Whether a polling loop is active
    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state.enabled
            && state
                .task
                .as_ref()
                .is_some_and(|running| !running.task.is_finished())
    }

    /// Current interval
    pub async fn interval(&self) -> Duration {
        self.state.lock().await.interval
    }

    fn spawn_locked(&self, state: &mut PollState) {
        if let Some(previous) = state.task.take() {
            previous.stop();
        }

        let controller = self.controller.clone();
        let interval = state.interval;
        let (stop, mut stopped) = watch::channel(false);
        info!("Polling every {:?}", interval);

        let task = tokio::spawn(async move {
            while !*stopped.borrow() {
                match controller.read().await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("Poll skipped, read in progress"),
                    Err(e) => warn!("Error polling position: {}", e),
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = stopped.wait_for(|stop| *stop) => break,
                }
            }
            debug!("Poll loop exited");
        });
        state.task = Some(PollLoop { stop, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::Session,
        transport::fake::{FakeMount, MOUNT_ID},
        types::{MountEvent, DEFERRED_DISCONNECT_DELAY},
    };
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const MINUTE: Duration = Duration::from_secs(60);

    fn scheduler(mount: &FakeMount) -> (PollScheduler, UnboundedReceiver<MountEvent>) {
        let session = Session::new(Arc::new(mount.clone()), MOUNT_ID);
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = PositionController::new(session, tx, DEFERRED_DISCONNECT_DELAY);
        (PollScheduler::new(controller, 5 * MINUTE), rx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let mount = FakeMount::new();
        let (scheduler, _events) = scheduler(&mount);

        scheduler.start(MINUTE).await;
        settle().await;
        assert!(scheduler.is_running().await);
        assert_eq!(mount.state().connects, 1);

        tokio::time::sleep(MINUTE + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(mount.state().connects, 2);

        tokio::time::sleep(MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mount = FakeMount::new();
        let (scheduler, _events) = scheduler(&mount);

        scheduler.stop().await;
        scheduler.start(MINUTE).await;
        settle().await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        tokio::time::sleep(10 * MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_read_finish() {
        let mount = FakeMount::new();
        mount.state().read_delay = Duration::from_millis(200);
        let (scheduler, mut events) = scheduler(&mount);

        scheduler.start(MINUTE).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(mount.state().connected);
        scheduler.stop().await;

        tokio::time::sleep(60 * MINUTE).await;
        settle().await;

        let state = mount.state();
        assert!(!state.connected);
        assert_eq!(state.connects, 1);
        assert_eq!(state.reads.len(), 2);
        assert_eq!(state.disconnects.len(), 1);
        drop(state);

        let mut published = 0;
        while events.try_recv().is_ok() {
            published += 1;
        }
        assert_eq!(published, 4);
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_cut_in_flight_read() {
        let mount = FakeMount::new();
        mount.state().read_delay = Duration::from_millis(200);
        let (scheduler, _events) = scheduler(&mount);

        scheduler.start(10 * MINUTE).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.reconfigure(MINUTE).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        // The replacement loop's first read is dropped while the old one runs.
        assert_eq!(mount.state().reads.len(), 2);
        assert_eq!(mount.state().disconnects.len(), 1);
        assert!(!mount.state().connected);

        tokio::time::sleep(MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 2);
        assert!(scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_while_disabled_has_no_effect() {
        let mount = FakeMount::new();
        let (scheduler, _events) = scheduler(&mount);

        scheduler.reconfigure(MINUTE).await;
        assert_eq!(scheduler.interval().await, MINUTE);
        assert!(!scheduler.is_running().await);

        tokio::time::sleep(10 * MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 0);
        assert!(mount.state().reads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_restarts_running_loop() {
        let mount = FakeMount::new();
        let (scheduler, _events) = scheduler(&mount);

        scheduler.start(10 * MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 1);

        scheduler.reconfigure(MINUTE).await;
        settle().await;
        assert_eq!(mount.state().connects, 2);

        tokio::time::sleep(MINUTE + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(mount.state().connects, 3);
        assert!(scheduler.is_running().await);
    }
}
