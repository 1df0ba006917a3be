/*
 * X Event handler functions
 * These are called in response to incoming XEvents so calling them directly should
 * only be done if the intent is to act as if the corresponding XEvent had been
 * received from the X event loop.
 */
use crate::{
    ipc::WmEvent,
    wm::WindowManager,
    xconnection::{Atom, Point, Rectangle, Window, WindowChanges, XConn, XEvent, XcbKey},
};

// _NET_WM_STATE client message actions
const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;
const NET_WM_STATE_TOGGLE: u32 = 2;

impl<C: XConn> WindowManager<C> {
    /// Handle every event that is already queued and return how many there were. Never blocks:
    /// the caller decides when the connection is worth polling again.
    pub fn dispatch(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.conn.poll_for_event() {
            self.handle_event(event);
            handled += 1;
        }
        if handled > 0 {
            self.conn.flush();
        }
        handled
    }

    pub fn handle_event(&mut self, event: XEvent) {
        debug!("got XEvent: {:?}", event);
        match event {
            XEvent::ButtonPress {
                id,
                child,
                button,
                state,
                rpt,
                wpt,
            } => self.handle_button_press(id, child, button, state, rpt, wpt),
            XEvent::ClientMessage { id, atom, data } => self.handle_client_message(id, atom, data),
            XEvent::ConfigureRequest(changes) => self.handle_configure_request(changes),
            XEvent::ConfigureNotify { id, r, is_root } => {
                self.handle_configure_notify(id, r, is_root)
            }
            XEvent::DestroyNotify { id } => self.handle_destroy_notify(id),
            XEvent::EnterNotify { id, rpt, wpt } => self.handle_enter_notify(id, rpt, wpt),
            XEvent::FocusIn { id } => self.handle_focus_in(id),
            XEvent::KeyPress { code, wpt } => self.handle_key_press(code, wpt),
            XEvent::MapRequest { id } => self.handle_map_request(id),
            XEvent::PropertyNotify {
                id,
                atom,
                is_root,
                deleted,
            } => self.handle_property_notify(id, atom, is_root, deleted),
            XEvent::UnmapNotify { id } => self.handle_unmap_notify(id),
            XEvent::ProtocolError { code } => {
                warn!("X protocol error (error code {}), ignoring it", code)
            }
            XEvent::Unknown { code } => debug!("did nothing with event type {}", code),
        }
    }

    fn handle_button_press(
        &mut self,
        id: Window,
        child: Window,
        button: u8,
        state: u16,
        rpt: Point,
        wpt: Point,
    ) {
        // TODO: drag to move / resize once the controller can ask for a pointer grab
        self.emit(WmEvent::MouseDown {
            id,
            child,
            button,
            state,
            rpt,
            wpt,
        });
    }

    fn handle_client_message(&mut self, id: Window, atom: Atom, data: [u32; 5]) {
        let atoms = *self.conn.atoms();
        if atom != atoms._NET_WM_STATE
            || (data[1] != atoms._NET_WM_STATE_FULLSCREEN
                && data[2] != atoms._NET_WM_STATE_FULLSCREEN)
        {
            return;
        }

        let current = self.windows.get(&id).map_or(false, |w| w.is_fullscreen());
        let fullscreen = match data[0] {
            NET_WM_STATE_REMOVE => false,
            NET_WM_STATE_ADD => true,
            NET_WM_STATE_TOGGLE => !current,
            action => {
                warn!("unknown _NET_WM_STATE action {} from window {}", action, id);
                return;
            }
        };

        self.conn.set_fullscreen_state(id, fullscreen);
        if fullscreen {
            self.conn.raise_window(id);
        }
        if let Some(w) = self.windows.get_mut(&id) {
            w.set_fullscreen(fullscreen);
        }
        self.emit(WmEvent::Fullscreen { id, fullscreen });
    }

    // Left entirely to the controller, which answers with configure / notify_configure.
    fn handle_configure_request(&mut self, changes: WindowChanges) {
        self.emit(WmEvent::ConfigureRequest(changes));
    }

    fn handle_configure_notify(&mut self, _id: Window, r: Rectangle, is_root: bool) {
        if !is_root {
            return;
        }
        info!("screen resized to {}x{}", r.w, r.h);
        self.screen_width = r.w;
        self.screen_height = r.h;
        self.rescan_monitors();
        self.emit(WmEvent::Rearrange);
    }

    fn handle_destroy_notify(&mut self, id: Window) {
        if self.is_managed(id) {
            self.remove(id, true);
        }
    }

    fn handle_enter_notify(&mut self, id: Window, rpt: Point, wpt: Point) {
        self.emit(WmEvent::EnterNotify { id, rpt, wpt });
    }

    /// Clients may not take the focus for themselves: a managed window gaining focus that we
    /// did not give it has the focus handed back.
    fn handle_focus_in(&mut self, id: Window) {
        if !self.config.prevent_focus_stealing {
            return;
        }
        if let Some(selected) = self.selected_window {
            if id != selected && self.is_managed(id) {
                debug!("reverting focus change by window {} to {}", id, selected);
                self.focus(selected);
            }
        }
    }

    fn handle_key_press(&mut self, key: XcbKey, wpt: Point) {
        let keysym = self.conn.keycode_to_keysym(key.code);
        self.emit(WmEvent::KeyPress {
            keycode: key.code,
            keysym,
            modifier: self.bindings.clean_mask(key.mod_mask),
            x: wpt.x,
            y: wpt.y,
        });
    }

    fn handle_map_request(&mut self, id: Window) {
        let attrs = match self.conn.window_attributes(id) {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!("unable to read attributes of window {}: {:#}", id, e);
                return;
            }
        };
        if attrs.override_redirect {
            return;
        }
        if self.is_managed(id) {
            debug!("window {} is known", id);
            return;
        }
        self.add(id, &attrs);
        self.emit(WmEvent::Rearrange);
    }

    fn handle_property_notify(&mut self, id: Window, atom: Atom, is_root: bool, deleted: bool) {
        let atoms = *self.conn.atoms();
        if is_root || deleted {
            return;
        }
        if (atom == atoms.WM_NAME || atom == atoms._NET_WM_NAME) && self.is_managed(id) {
            self.refresh_metadata(id);
        }
    }

    fn handle_unmap_notify(&mut self, id: Window) {
        if self.is_managed(id) {
            self.remove(id, false);
        }
    }
}
