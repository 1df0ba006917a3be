//! The boundary between the window manager core and the controller that decides layout.
//!
//! The core reports what happened as [WmEvent]s through an [EventSink]; the controller answers
//! with [Command]s. Both have a one-line text form so a controller can live in another process
//! and talk to the `nwm` binary over its stdin / stdout.
use std::{
    convert::TryFrom,
    fmt,
    str::{FromStr, SplitWhitespace},
    sync::mpsc::{self, Receiver, Sender},
};

use anyhow::{anyhow, Context, Result};

use crate::{
    monitor::Monitor,
    xconnection::{Keycode, Keysym, Point, Rectangle, Window, WindowChanges},
};

/// Normalized events reported to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum WmEvent {
    AddWindow {
        id: Window,
        region: Rectangle,
        border_width: u32,
        floating: bool,
    },
    UpdateWindowTitle {
        id: Window,
        title: String,
        class: String,
        instance: String,
    },
    RemoveWindow {
        id: Window,
    },
    AddMonitor(Monitor),
    UpdateMonitor(Monitor),
    RemoveMonitor(Monitor),
    /// Layout should be recomputed
    Rearrange,
    KeyPress {
        keycode: Keycode,
        keysym: Keysym,
        /// Held modifiers with Num_Lock and Caps_Lock removed
        modifier: u16,
        x: i32,
        y: i32,
    },
    MouseDown {
        id: Window,
        child: Window,
        button: u8,
        state: u16,
        rpt: Point,
        wpt: Point,
    },
    EnterNotify {
        id: Window,
        rpt: Point,
        wpt: Point,
    },
    ConfigureRequest(WindowChanges),
    Fullscreen {
        id: Window,
        fullscreen: bool,
    },
}

impl fmt::Display for WmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WmEvent::AddWindow {
                id,
                region,
                border_width,
                floating,
            } => write!(
                f,
                "add_window {} {} {} {} {} {} {}",
                id, region.x, region.y, region.w, region.h, border_width, floating
            ),
            WmEvent::UpdateWindowTitle {
                id,
                title,
                class,
                instance,
            } => write!(
                f,
                "update_window_title {} {:?} {:?} {:?}",
                id, title, class, instance
            ),
            WmEvent::RemoveWindow { id } => write!(f, "remove_window {}", id),
            WmEvent::AddMonitor(m) => write!(f, "add_monitor {}", m),
            WmEvent::UpdateMonitor(m) => write!(f, "update_monitor {}", m),
            WmEvent::RemoveMonitor(m) => write!(f, "remove_monitor {}", m),
            WmEvent::Rearrange => write!(f, "rearrange"),
            WmEvent::KeyPress {
                keycode,
                keysym,
                modifier,
                x,
                y,
            } => write!(
                f,
                "key_press {} {:#x} {:#x} {} {}",
                keycode, keysym, modifier, x, y
            ),
            WmEvent::MouseDown {
                id,
                child,
                button,
                state,
                rpt,
                wpt,
            } => write!(
                f,
                "mouse_down {} {} {} {:#x} {} {} {} {}",
                id, child, button, state, rpt.x, rpt.y, wpt.x, wpt.y
            ),
            WmEvent::EnterNotify { id, rpt, wpt } => write!(
                f,
                "enter_notify {} {} {} {} {}",
                id, rpt.x, rpt.y, wpt.x, wpt.y
            ),
            WmEvent::ConfigureRequest(c) => write!(
                f,
                "configure_request {} {} {} {} {} {} {} {} {:#x}",
                c.id,
                c.x,
                c.y,
                c.width,
                c.height,
                c.border_width,
                c.sibling,
                c.stack_mode,
                c.value_mask
            ),
            WmEvent::Fullscreen { id, fullscreen } => write!(f, "fullscreen {} {}", id, fullscreen),
        }
    }
}

/// Somewhere to deliver [WmEvent]s.
pub trait EventSink {
    fn emit(&mut self, event: WmEvent);
}

impl<F> EventSink for F
where
    F: FnMut(WmEvent),
{
    fn emit(&mut self, event: WmEvent) {
        self(event)
    }
}

/// An [EventSink] feeding an in-process channel.
pub struct ChannelSink {
    tx: Sender<WmEvent>,
    disconnected: bool,
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: WmEvent) {
        if self.tx.send(event).is_err() && !self.disconnected {
            warn!("controller channel is closed, dropping events");
            self.disconnected = true;
        }
    }
}

/// A connected [ChannelSink] and the receiving end the controller reads from.
pub fn channel() -> (ChannelSink, Receiver<WmEvent>) {
    let (tx, rx) = mpsc::channel();
    (
        ChannelSink {
            tx,
            disconnected: false,
        },
        rx,
    )
}

/// Requests the controller can make of the window manager
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move {
        id: Window,
        x: i32,
        y: i32,
    },
    Resize {
        id: Window,
        width: u32,
        height: u32,
    },
    Configure(WindowChanges),
    /// Tell a window its geometry without changing it
    NotifyConfigure {
        id: Window,
        region: Rectangle,
        border_width: u32,
    },
    Focus {
        id: Window,
    },
    Kill {
        id: Window,
    },
    /// Add a binding to the table; takes effect on the next `GrabKeys`
    AddKey {
        keysym: Keysym,
        mod_mask: u16,
    },
    /// Empty the table; the grabs already held are released by the next `GrabKeys`
    ClearKeys,
    /// Release every key grab and grab the current binding set
    GrabKeys,
}

struct Args<'a> {
    cmd: &'a str,
    words: SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next<T: FromInt>(&mut self, what: &str) -> Result<T> {
        let word = self
            .words
            .next()
            .with_context(|| format!("{}: missing {}", self.cmd, what))?;
        T::from_int(word).with_context(|| format!("{}: invalid {} {:?}", self.cmd, what, word))
    }

    fn finish(mut self) -> Result<()> {
        match self.words.next() {
            Some(extra) => Err(anyhow!("{}: unexpected argument {:?}", self.cmd, extra)),
            None => Ok(()),
        }
    }
}

/// Integers on the wire may be written in decimal or as 0x-prefixed hex.
trait FromInt: Sized {
    fn from_int(s: &str) -> Result<Self>;
}

macro_rules! from_int {
    ( $( $t:ty ),+ ) => {
        $(
            impl FromInt for $t {
                fn from_int(s: &str) -> Result<$t> {
                    let (digits, radix, negative) = match s.strip_prefix('-') {
                        Some(rest) => (rest, 10, true),
                        None => match s.strip_prefix("0x") {
                            Some(hex) => (hex, 16, false),
                            None => (s, 10, false),
                        },
                    };
                    let value = i64::from_str_radix(digits, radix)?;
                    let value = if negative { -value } else { value };
                    Ok(<$t>::try_from(value)?)
                }
            }
        )+
    };
}

from_int!(i32, u32, u16, u8);

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Command> {
        let mut words = line.split_whitespace();
        let cmd = words.next().context("empty command")?;
        let mut args = Args { cmd, words };

        let command = match cmd {
            "move" => Command::Move {
                id: args.next("window")?,
                x: args.next("x")?,
                y: args.next("y")?,
            },
            "resize" => Command::Resize {
                id: args.next("window")?,
                width: args.next("width")?,
                height: args.next("height")?,
            },
            "configure" => Command::Configure(WindowChanges {
                id: args.next("window")?,
                x: args.next("x")?,
                y: args.next("y")?,
                width: args.next("width")?,
                height: args.next("height")?,
                border_width: args.next("border width")?,
                sibling: args.next("sibling")?,
                stack_mode: args.next("stack mode")?,
                value_mask: args.next("value mask")?,
            }),
            "notify_configure" => Command::NotifyConfigure {
                id: args.next("window")?,
                region: Rectangle::new(
                    args.next("x")?,
                    args.next("y")?,
                    args.next("width")?,
                    args.next("height")?,
                ),
                border_width: args.next("border width")?,
            },
            "focus" => Command::Focus {
                id: args.next("window")?,
            },
            "kill" => Command::Kill {
                id: args.next("window")?,
            },
            "add_key" => Command::AddKey {
                keysym: args.next("keysym")?,
                mod_mask: args.next("modifier")?,
            },
            "clear_keys" => Command::ClearKeys,
            "grab_keys" => Command::GrabKeys,
            _ => return Err(anyhow!("unknown command {:?}", cmd)),
        };
        args.finish()?;

        Ok(command)
    }
}
