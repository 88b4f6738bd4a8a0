//! Routing of actions to modules.

use crate::actions::Action;
use crate::modules::ModuleHandle;

/// Action that runs hook `index` of the IPC module `module`
pub fn hook_action(module: &str, index: usize) -> Action {
    Action::structured(module, "hook", index.to_string())
}

/// Deliver `action` to the module that accepts it.
///
/// Returns the name of that module.
pub fn dispatch<'a>(modules: &'a mut [ModuleHandle], action: &Action) -> Option<&'a str> {
    match action {
        Action::Structured {
            module,
            action,
            data,
        } => forward_action(modules, module, action, data),
        Action::Legacy(cmd) => try_forward_legacy_action(modules, cmd),
    }
}

fn forward_action<'a>(
    modules: &'a mut [ModuleHandle],
    target: &str,
    action: &str,
    data: &str,
) -> Option<&'a str> {
    let Some(module) = modules.iter_mut().find(|m| m.name() == target) else {
        log::debug!("Controller: no module named {}", target);
        return None;
    };
    if !module.is_running() {
        log::debug!("Controller: module {} is not running", target);
        return None;
    }
    if module.input(action, data) {
        Some(module.name())
    } else {
        None
    }
}

fn try_forward_legacy_action<'a>(modules: &'a mut [ModuleHandle], cmd: &str) -> Option<&'a str> {
    modules
        .iter_mut()
        .filter(|m| m.is_running())
        .find_map(|m| if m.input(cmd, "") { Some(m.name()) } else { None })
}
