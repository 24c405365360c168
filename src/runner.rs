//! Device registry and worker harness
//!
//! [`Runner::spawn`] starts one independent tokio task per device. Workers
//! share nothing but the runner's [`StopSignal`], which they only read, so a
//! slow or stuck device never holds up another device's cadence.

use crate::device::{Device, DeviceReport, DeviceSettings};
use crate::error::{Result, SimError};
use crate::signal::StopSignal;
use crate::transport::TransportFactory;
use crate::types::{DeviceSpec, DeviceState};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Handle to one spawned device worker
pub struct DeviceHandle {
    id: String,
    state: watch::Receiver<DeviceState>,
    task: JoinHandle<DeviceReport>,
}

impl DeviceHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state of the device
    #[must_use]
    pub fn state(&self) -> DeviceState {
        *self.state.borrow()
    }

    /// Waits until the device reaches `target`
    ///
    /// Returns the state actually observed, which is `Disconnected` if the
    /// worker ended before reaching `target`.
    pub async fn wait_for_state(&mut self, target: DeviceState) -> DeviceState {
        // the sender is dropped when the worker ends, which ends the wait
        let reached = self.state.wait_for(|s| *s == target).await.map(|s| *s);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the worker to finish
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Worker`] if the worker panicked or was aborted
    pub async fn join(self) -> Result<DeviceReport> {
        self.task.await.map_err(|e| SimError::Worker {
            device: self.id,
            reason: e.to_string(),
        })
    }
}

/// Spawns devices against one transport factory and one stop signal
pub struct Runner<F: TransportFactory> {
    factory: Arc<F>,
    settings: Arc<DeviceSettings>,
    stop: StopSignal,
}

impl<F: TransportFactory> Runner<F> {
    pub fn new(factory: Arc<F>, settings: Arc<DeviceSettings>) -> Self {
        Self {
            factory,
            settings,
            stop: StopSignal::new(),
        }
    }

    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Creates a device and starts its worker
    pub fn spawn(&self, spec: DeviceSpec) -> DeviceHandle {
        let transport = self.factory.create(&spec.id);
        let device = Device::new(spec, transport, Arc::clone(&self.settings));
        self.launch(device)
    }

    /// Starts the worker of an already built device
    pub fn launch(&self, device: Device<F::Transport>) -> DeviceHandle {
        let id = device.id().to_string();
        let state = device.watch_state();
        let task = tokio::spawn(device.run(self.stop.clone()));
        DeviceHandle { id, state, task }
    }

    /// Raises the stop signal; workers finish their current tick and disconnect
    pub fn stop_all(&self) {
        if !self.stop.is_raised() {
            info!("Stopping all devices");
        }
        self.stop.raise();
    }

    /// Stops every worker and waits for all of them
    pub async fn shutdown(&self, handles: Vec<DeviceHandle>) -> Vec<DeviceReport> {
        self.stop_all();
        drain(handles).await
    }
}

/// Waits for every worker, logging and skipping those that panicked
pub async fn drain(handles: Vec<DeviceHandle>) -> Vec<DeviceReport> {
    join_all(handles.into_iter().map(DeviceHandle::join))
        .await
        .into_iter()
        .filter_map(|result| match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Device worker failed");
                None
            }
        })
        .collect()
}
