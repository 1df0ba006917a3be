use std::fmt;

use crate::{
    ipc::{EventSink, WmEvent},
    xconnection::{Rectangle, XConn},
};

/// A physical display region, identified by its position in discovery order
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Monitor {
    pub index: usize,
    pub region: Rectangle,
}

impl Monitor {
    pub fn new(index: usize, region: Rectangle) -> Monitor {
        Monitor { index, region }
    }
}

impl fmt::Display for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y, w, h) = self.region.values();
        write!(f, "{} {} {} {} {}", self.index, x, y, w, h)
    }
}

/**
 * The monitors the controller has been told about.
 *
 * Monitors are matched between rescans purely by index: surviving indices are updated, new
 * ones are appended and missing ones are dropped from the tail.
 */
#[derive(Debug, Default)]
pub struct Monitors {
    known: Vec<Monitor>,
}

impl Monitors {
    pub fn new() -> Self {
        Monitors::default()
    }

    pub fn known(&self) -> &[Monitor] {
        &self.known
    }

    pub fn count(&self) -> usize {
        self.known.len()
    }

    /// Query the server for the current display regions, report the differences and tell the
    /// controller where the pointer is.
    pub fn rescan<C: XConn>(&mut self, conn: &C, screen: (u32, u32), sink: &mut dyn EventSink) {
        if !conn.xinerama_active() {
            if self.known.is_empty() {
                let monitor = Monitor::new(0, Rectangle::new(0, 0, screen.0, screen.1));
                info!("Xinerama inactive, using the whole screen as monitor 0");
                self.known.push(monitor);
                sink.emit(WmEvent::AddMonitor(monitor));
                update_selected_monitor(conn, sink);
            }
            return;
        }

        let regions = match conn.xinerama_screens() {
            Ok(regions) => regions,
            Err(e) => {
                warn!("{:#}", e);
                return;
            }
        };
        let unique = unique_regions(&regions);
        info!(
            "monitors known {}, monitors found {}",
            self.known.len(),
            unique.len()
        );
        self.reconcile(&unique, sink);
        update_selected_monitor(conn, sink);
    }

    fn reconcile(&mut self, unique: &[Rectangle], sink: &mut dyn EventSink) {
        if self.known.len() <= unique.len() {
            for (index, &region) in unique.iter().enumerate() {
                let monitor = Monitor::new(index, region);
                if index >= self.known.len() {
                    self.known.push(monitor);
                    sink.emit(WmEvent::AddMonitor(monitor));
                } else {
                    self.known[index] = monitor;
                    sink.emit(WmEvent::UpdateMonitor(monitor));
                }
            }
        } else {
            debug!(
                "fewer monitors available: {} -> {}",
                self.known.len(),
                unique.len()
            );
            while self.known.len() > unique.len() {
                if let Some(monitor) = self.known.pop() {
                    sink.emit(WmEvent::RemoveMonitor(monitor));
                }
            }
        }
    }
}

/// Report the pointer position as an enter on the root window so the controller can tell which
/// monitor is selected.
fn update_selected_monitor<C: XConn>(conn: &C, sink: &mut dyn EventSink) {
    if let Some(pt) = conn.query_pointer() {
        debug!("pointer at {:?}", pt);
        sink.emit(WmEvent::EnterNotify {
            id: conn.root(),
            rpt: pt,
            wpt: pt,
        });
    }
}

/// Drop regions whose geometry exactly repeats an earlier one.
pub fn unique_regions(regions: &[Rectangle]) -> Vec<Rectangle> {
    let mut unique: Vec<Rectangle> = Vec::with_capacity(regions.len());
    for r in regions {
        if !unique.contains(r) {
            unique.push(*r);
        }
    }
    unique
}
