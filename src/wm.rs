use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::{
    bindings::Bindings,
    ipc::{Command, EventSink, WmEvent},
    monitor::Monitors,
    window::{name_or, ManagedWindow, PLACEHOLDER_NAME},
    xconnection::{
        Keysym, Rectangle, ServerGrab, Window, WindowAttributes, WindowChanges, XConn,
        CLIENT_EVENT_MASK, CONFIG_WINDOW_BORDER_WIDTH, CONFIG_WINDOW_HEIGHT, CONFIG_WINDOW_WIDTH,
        CONFIG_WINDOW_X, CONFIG_WINDOW_Y, ROOT_EVENT_MASK,
    },
};

/// The main user facing configuration details
#[derive(Debug, Clone)]
pub struct Config {
    /// Title / class reported for windows that do not set one
    pub placeholder_name: String,
    /// Revert focus changes made by clients themselves to the window last focused by us
    pub prevent_focus_stealing: bool,
    /// Event mask selected on the root window
    pub root_event_mask: u32,
    /// Event mask selected on every managed window
    pub client_event_mask: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            placeholder_name: PLACEHOLDER_NAME.to_string(),
            prevent_focus_stealing: true,
            root_event_mask: ROOT_EVENT_MASK,
            client_event_mask: CLIENT_EVENT_MASK,
        }
    }
}

/**
 * Tracks the windows and monitors of one X display and enforces window manager semantics on
 * them. Decisions about where windows go are left to the controller on the other side of the
 * [EventSink].
 */
pub struct WindowManager<C: XConn> {
    pub(crate) conn: C,
    pub(crate) config: Config,
    pub(crate) sink: Box<dyn EventSink>,
    pub(crate) bindings: Bindings,
    pub(crate) monitors: Monitors,
    pub(crate) windows: HashMap<Window, ManagedWindow>,
    pub(crate) selected_window: Option<Window>,
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl<C: XConn> WindowManager<C> {
    pub fn new(conn: C, config: Config, sink: Box<dyn EventSink>) -> Self {
        let (screen_width, screen_height) = conn.screen_size();
        WindowManager {
            conn,
            config,
            sink,
            bindings: Bindings::new(),
            monitors: Monitors::new(),
            windows: HashMap::new(),
            selected_window: None,
            screen_width,
            screen_height,
        }
    }

    /// Take over the display: subscribe to root events, find the monitors, grab keys and
    /// manage every window that is already mapped.
    pub fn init(&mut self) -> Result<()> {
        self.conn
            .select_root_events(self.config.root_event_mask)
            .context("Unable to become the window manager")?;
        self.rescan_monitors();
        self.grab_keys();
        self.scan_existing();
        self.emit(WmEvent::Rearrange);
        self.conn.sync();
        Ok(())
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    pub fn selected_window(&self) -> Option<Window> {
        self.selected_window
    }

    pub fn monitors(&self) -> &Monitors {
        &self.monitors
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn is_managed(&self, id: Window) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn window(&self, id: Window) -> Option<&ManagedWindow> {
        self.windows.get(&id)
    }

    /// Ids of every managed window, in no particular order
    pub fn managed_windows(&self) -> Vec<Window> {
        self.windows.keys().copied().collect()
    }

    pub(crate) fn emit(&mut self, event: WmEvent) {
        trace!("emit: {}", event);
        self.sink.emit(event);
    }

    pub(crate) fn rescan_monitors(&mut self) {
        let screen = (self.screen_width, self.screen_height);
        self.monitors.rescan(&self.conn, screen, &mut *self.sink);
    }

    /// Manage every viewable top-level window, plain windows first and transients second so
    /// that dialogs are added after the windows they belong to.
    pub fn scan_existing(&mut self) {
        let children = match self.conn.query_tree() {
            Ok(children) => children,
            Err(e) => {
                error!("unable to list existing windows: {:#}", e);
                return;
            }
        };

        let mut transients = vec![];
        for id in children {
            let attrs = match self.conn.window_attributes(id) {
                Ok(attrs) => attrs,
                Err(e) => {
                    debug!("skipping window {}: {:#}", id, e);
                    continue;
                }
            };
            if attrs.override_redirect || !attrs.viewable {
                continue;
            }
            if self.conn.transient_for(id).is_some() {
                transients.push((id, attrs));
            } else {
                self.add(id, &attrs);
            }
        }
        for (id, attrs) in transients {
            self.add(id, &attrs);
        }
    }

    /// Take over management of a window: report it to the controller, subscribe to its events
    /// and map it at the geometry it asked for.
    pub fn add(&mut self, id: Window, attrs: &WindowAttributes) {
        if self.is_managed(id) {
            warn!("window {} is already managed", id);
            return;
        }
        let floating = self.conn.transient_for(id).is_some();
        let region = attrs.region;
        info!(
            "managing window {} ({:?}, border {}, floating {})",
            id, region, attrs.border_width, floating
        );

        self.windows
            .insert(id, ManagedWindow::new(id, region, attrs.border_width, floating));
        self.emit(WmEvent::AddWindow {
            id,
            region,
            border_width: attrs.border_width,
            floating,
        });
        self.refresh_metadata(id);

        self.conn.send_configure_notify(id, region, attrs.border_width);
        self.conn.select_window_events(id, self.config.client_event_mask);
        self.grab_buttons(id, false);
        if floating {
            self.conn.raise_window(id);
        }
        // resize before mapping so the window never shows at the wrong size
        self.conn.move_resize_window(id, region);
        self.conn.map_window(id);
        self.conn.flush();
    }

    /// Re-read the title and class of a window and report them, substituting the placeholder
    /// for anything missing.
    pub fn refresh_metadata(&mut self, id: Window) {
        let atoms = *self.conn.atoms();
        let title = self
            .conn
            .text_property(id, atoms._NET_WM_NAME)
            .filter(|t| !t.is_empty())
            .or_else(|| self.conn.text_property(id, atoms.WM_NAME));
        let class = self.conn.wm_class(id);

        let placeholder = self.config.placeholder_name.as_str();
        let title = name_or(title.as_deref(), placeholder).to_string();
        let (instance, class) = match &class {
            Some((instance, class)) => (
                name_or(Some(instance.as_str()), placeholder).to_string(),
                name_or(Some(class.as_str()), placeholder).to_string(),
            ),
            None => (placeholder.to_string(), placeholder.to_string()),
        };

        if let Some(w) = self.windows.get_mut(&id) {
            w.set_names(&title, &class, &instance);
        }
        debug!("window {} is {:?} ({} / {})", id, title, class, instance);
        self.emit(WmEvent::UpdateWindowTitle {
            id,
            title,
            class,
            instance,
        });
    }

    /// Stop managing a window. Focus returns to the root window and the controller is asked to
    /// rearrange whatever is left.
    pub fn remove(&mut self, id: Window, destroyed: bool) {
        info!("removing window {} (destroyed: {})", id, destroyed);
        self.windows.remove(&id);
        self.emit(WmEvent::RemoveWindow { id });
        if !destroyed {
            let _grab = ServerGrab::new(&self.conn);
            self.conn.ungrab_buttons(id);
            self.conn.sync();
        }
        let root = self.conn.root();
        self.focus(root);
        self.emit(WmEvent::Rearrange);
    }

    /// Button grabs on a window: unfocused windows grab every button so a click can focus
    /// them, focused windows receive their clicks directly.
    fn grab_buttons(&self, id: Window, focused: bool) {
        self.conn.ungrab_buttons(id);
        if !focused {
            self.conn.grab_any_button(id);
        }
    }

    pub fn move_window(&mut self, id: Window, x: i32, y: i32) {
        debug!("move window {} to ({}, {})", id, x, y);
        self.conn.move_window(id, x, y);
        self.conn.flush();
        if let Some(w) = self.windows.get_mut(&id) {
            w.set_position(x, y);
        }
    }

    pub fn resize_window(&mut self, id: Window, width: u32, height: u32) {
        debug!("resize window {} to {}x{}", id, width, height);
        self.conn.resize_window(id, width, height);
        self.conn.flush();
        if let Some(w) = self.windows.get_mut(&id) {
            w.set_size(width, height);
        }
    }

    pub fn configure_window(&mut self, changes: &WindowChanges) {
        debug!("configure window: {:?}", changes);
        self.conn.configure_window(changes);
        self.conn.flush();

        let mask = changes.value_mask;
        if let Some(w) = self.windows.get_mut(&changes.id) {
            let mut region = w.region();
            if mask & CONFIG_WINDOW_X != 0 {
                region.x = changes.x;
            }
            if mask & CONFIG_WINDOW_Y != 0 {
                region.y = changes.y;
            }
            if mask & CONFIG_WINDOW_WIDTH != 0 {
                region.w = changes.width;
            }
            if mask & CONFIG_WINDOW_HEIGHT != 0 {
                region.h = changes.height;
            }
            w.set_position(region.x, region.y);
            w.set_size(region.w, region.h);
            if mask & CONFIG_WINDOW_BORDER_WIDTH != 0 {
                w.set_border_width(changes.border_width);
            }
        }
    }

    /// Tell a window where it is without moving it.
    pub fn notify_configure(&mut self, id: Window, region: Rectangle, border_width: u32) {
        self.conn.send_configure_notify(id, region, border_width);
        self.conn.flush();
    }

    pub fn focus(&mut self, id: Window) {
        debug!("focus window {}", id);
        self.grab_buttons(id, true);
        self.conn.set_input_focus(id);
        let atoms = *self.conn.atoms();
        if self.conn.wm_protocols(id).contains(&atoms.WM_TAKE_FOCUS) {
            self.conn.send_client_message(id, atoms.WM_TAKE_FOCUS);
        }
        self.conn.flush();
        self.selected_window = Some(id);
    }

    /// Close a window, politely through WM_DELETE_WINDOW when it supports that and by killing
    /// its client otherwise.
    pub fn kill(&mut self, id: Window) {
        let atoms = *self.conn.atoms();
        if self.conn.wm_protocols(id).contains(&atoms.WM_DELETE_WINDOW) {
            info!("closing window {} using WM_DELETE_WINDOW", id);
            self.conn.send_client_message(id, atoms.WM_DELETE_WINDOW);
            self.conn.flush();
            return;
        }

        info!("killing the client of window {}", id);
        let _grab = ServerGrab::new(&self.conn);
        if let Err(e) = self.conn.kill_client(id) {
            // the resource may vanish while we kill it
            debug!("ignoring error while killing window {}: {:#}", id, e);
        }
        self.conn.sync();
    }

    /// Add a binding to the table. Nothing is grabbed until the next [WindowManager::grab_keys].
    pub fn add_key(&mut self, keysym: Keysym, mod_mask: u16) {
        self.bindings.add(keysym, mod_mask);
    }

    /// Empty the table. Keys grabbed earlier stay grabbed until the next
    /// [WindowManager::grab_keys].
    pub fn clear_keys(&mut self) {
        self.bindings.clear();
    }

    pub fn grab_keys(&mut self) {
        self.bindings.regrab(&self.conn);
    }

    /// Carry out a request from the controller.
    pub fn apply(&mut self, command: Command) {
        trace!("apply: {:?}", command);
        match command {
            Command::Move { id, x, y } => self.move_window(id, x, y),
            Command::Resize { id, width, height } => self.resize_window(id, width, height),
            Command::Configure(changes) => self.configure_window(&changes),
            Command::NotifyConfigure {
                id,
                region,
                border_width,
            } => self.notify_configure(id, region, border_width),
            Command::Focus { id } => self.focus(id),
            Command::Kill { id } => self.kill(id),
            Command::AddKey { keysym, mod_mask } => self.add_key(keysym, mod_mask),
            Command::ClearKeys => self.clear_keys(),
            Command::GrabKeys => self.grab_keys(),
        }
    }
}
