//! Worker threads for modules that poll on their own schedule.
//!
//! Each worker runs while the controller allows processing. Changes are
//! handed to the reactor thread through the controller's queue; the worker
//! never touches controller state directly.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::SharedModule;
use crate::controller::{ControllerHandle, Handoff};

/// Upper bound on how long a sleeping worker takes to notice a stop.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

pub(super) fn spawn(
    index: usize,
    name: &str,
    module: SharedModule,
    controller: ControllerHandle,
) -> io::Result<JoinHandle<()>> {
    let name = name.to_string();
    thread::Builder::new()
        .name(format!("module-{}", name))
        .spawn(move || run(index, &name, &module, &controller))
}

fn run(index: usize, name: &str, module: &SharedModule, controller: &ControllerHandle) {
    log::debug!("Worker: {} started", name);

    while controller.is_processing_allowed() {
        let (changed, interval) = {
            let mut module = module.lock();
            let changed = if module.has_event() {
                match module.update(false) {
                    Ok(changed) => changed,
                    Err(e) if e.is_transient() => {
                        log::warn!("Worker: {} update failed ({})", name, e);
                        false
                    }
                    Err(e) => {
                        log::error!("Worker: {} halted ({})", name, e);
                        break;
                    }
                }
            } else {
                false
            };
            (changed, module.poll_interval())
        };

        if changed {
            controller.handoff(Handoff::ModuleChanged(index));
        }
        sleep_while_allowed(interval, controller);
    }

    controller.handoff(Handoff::ModuleStopped(index));
    log::debug!("Worker: {} exited", name);
}

fn sleep_while_allowed(interval: Duration, controller: &ControllerHandle) {
    let until = Instant::now() + interval;
    loop {
        if !controller.is_processing_allowed() {
            return;
        }
        let now = Instant::now();
        if now >= until {
            return;
        }
        thread::sleep((until - now).min(STOP_CHECK_SLICE));
    }
}
