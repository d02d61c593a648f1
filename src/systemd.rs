//! sd_notify messages for running under systemd.
//!
//! Every method is a no-op when disabled or off Linux.

use crate::processor::ProcessorHandle;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn notify_ready(&self) {
        if self.enabled {
            send(&[NotifyMessage::Ready]);
        }
    }

    pub(crate) fn notify_stopping(&self) {
        if self.enabled {
            send(&[NotifyMessage::Stopping]);
        }
    }

    pub(crate) fn notify_status(&self, msg: &str) {
        if self.enabled {
            send(&[NotifyMessage::Status(msg)]);
        }
    }

    /// Mirror the processor state into `STATUS=` until `stop` fires.
    pub(crate) async fn report_processor(
        self,
        handle: ProcessorHandle,
        stop: tokio_util::sync::CancellationToken,
    ) {
        if !self.enabled {
            return;
        }
        let mut last = String::new();
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let line = status_line(&handle);
            if line != last {
                self.notify_status(&line);
                last = line;
            }
        }
    }
}

fn status_line(handle: &ProcessorHandle) -> String {
    match handle.current_link_id() {
        Some(link_id) => format!("{} (link {})", handle.status().as_str(), link_id),
        None => handle.status().as_str().to_string(),
    }
}

enum NotifyMessage<'a> {
    Ready,
    Stopping,
    Status(&'a str),
}

#[cfg(target_os = "linux")]
fn send(messages: &[NotifyMessage<'_>]) {
    let states: Vec<sd_notify::NotifyState<'_>> = messages
        .iter()
        .map(|m| match m {
            NotifyMessage::Ready => sd_notify::NotifyState::Ready,
            NotifyMessage::Stopping => sd_notify::NotifyState::Stopping,
            NotifyMessage::Status(s) => sd_notify::NotifyState::Status(s),
        })
        .collect();
    if let Err(e) = sd_notify::notify(false, &states) {
        tracing::debug!(error = %e, "sd_notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn send(_messages: &[NotifyMessage<'_>]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_is_noop() {
        let n = SystemdNotifier::new(false);
        n.notify_ready();
        n.notify_status("test");
        n.notify_stopping();
    }

    #[test]
    fn enabled_notifier_without_socket_does_not_panic() {
        let n = SystemdNotifier::new(true);
        n.notify_ready();
        n.notify_status("test");
        n.notify_stopping();
    }

    #[test]
    fn status_line_includes_current_link() {
        let handle = ProcessorHandle::new("w");
        assert_eq!(status_line(&handle), "idle");
        handle.set_current_link(Some(7));
        assert_eq!(status_line(&handle), "idle (link 7)");
    }
}
