use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{anyhow, Context, Result};

use xcb::xinerama;
use xcb_util::{ewmh, icccm, keysyms::KeySymbols};

pub use xcb::{Atom, Keycode, Keysym, Window};

// Each event in the X11 protocol contains an 8-bit type code. The most-significant bit in this
// code is set if the event was generated from a SendEvent request.
const XCB_RESPONSE_TYPE_MASK: u8 = 0x7F;
const GRAB_MODE_ASYNC: u8 = xcb::GRAB_MODE_ASYNC as u8;
const INPUT_FOCUS_POINTER_ROOT: u8 = xcb::INPUT_FOCUS_POINTER_ROOT as u8;
const PROP_MODE_REPLACE: u8 = xcb::PROP_MODE_REPLACE as u8;
const CLOSE_DOWN_DESTROY_ALL: u8 = xcb::CLOSE_DOWN_DESTROY_ALL as u8;
const BUTTON_MASK: u16 = (xcb::EVENT_MASK_BUTTON_PRESS | xcb::EVENT_MASK_BUTTON_RELEASE) as u16;

pub const CONFIG_WINDOW_X: u16 = xcb::CONFIG_WINDOW_X as u16;
pub const CONFIG_WINDOW_Y: u16 = xcb::CONFIG_WINDOW_Y as u16;
pub const CONFIG_WINDOW_WIDTH: u16 = xcb::CONFIG_WINDOW_WIDTH as u16;
pub const CONFIG_WINDOW_HEIGHT: u16 = xcb::CONFIG_WINDOW_HEIGHT as u16;
pub const CONFIG_WINDOW_BORDER_WIDTH: u16 = xcb::CONFIG_WINDOW_BORDER_WIDTH as u16;
pub const CONFIG_WINDOW_SIBLING: u16 = xcb::CONFIG_WINDOW_SIBLING as u16;
pub const CONFIG_WINDOW_STACK_MODE: u16 = xcb::CONFIG_WINDOW_STACK_MODE as u16;

/// Events the root window must deliver for us to act as the window manager.
pub const ROOT_EVENT_MASK: u32 = xcb::EVENT_MASK_SUBSTRUCTURE_REDIRECT
    | xcb::EVENT_MASK_SUBSTRUCTURE_NOTIFY
    | xcb::EVENT_MASK_BUTTON_PRESS
    | xcb::EVENT_MASK_ENTER_WINDOW
    | xcb::EVENT_MASK_LEAVE_WINDOW
    | xcb::EVENT_MASK_STRUCTURE_NOTIFY
    | xcb::EVENT_MASK_PROPERTY_CHANGE;

/// Events every managed window is subscribed to.
pub const CLIENT_EVENT_MASK: u32 = xcb::EVENT_MASK_ENTER_WINDOW
    | xcb::EVENT_MASK_FOCUS_CHANGE
    | xcb::EVENT_MASK_PROPERTY_CHANGE
    | xcb::EVENT_MASK_STRUCTURE_NOTIFY;

macro_rules! atoms {
    ( $( $name:ident ),+ ) => {
        #[allow(non_snake_case)]
        #[derive(Debug, Clone, Copy)]
        pub struct InternedAtoms {
            $(
                pub $name: Atom
            ),*
        }

        impl InternedAtoms {
            pub fn new(conn: &xcb::Connection) -> Result<InternedAtoms> {
                Ok(InternedAtoms {
                    $(
                        $name: xcb::intern_atom(conn, false, stringify!($name))
                            .get_reply()
                            .map_err(|e| anyhow!(
                                "interning {} failed with error code {}",
                                stringify!($name),
                                e.error_code()
                            ))?
                            .atom()
                    ),*
                })
            }
        }
    };
    // Allow trailing comma:
    ( $( $name:ident ),+ , ) => (atoms!($( $name ),+);)
}

atoms!(
    WM_NAME,
    WM_PROTOCOLS,
    WM_DELETE_WINDOW,
    WM_TAKE_FOCUS,
    _NET_WM_NAME,
    _NET_WM_STATE,
    _NET_WM_STATE_FULLSCREEN,
);

/// An X key-code along with a modifier mask
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct XcbKey {
    /// Modifier key bit mask
    pub mod_mask: u16,
    /// X key code
    pub code: Keycode,
}

impl XcbKey {
    /// Build a new XcbKey from an XCB KeyPressEvent
    pub fn from_key_press(k: &xcb::KeyPressEvent) -> XcbKey {
        XcbKey {
            mod_mask: k.state(),
            code: k.detail(),
        }
    }
}

/// An x,y coordinate pair
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Create a new Point.
    pub fn new(x: i32, y: i32) -> Point {
        Point { x, y }
    }
}

/// An X window / screen position: top left corner + extent
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rectangle {
    /// Create a new Rectangle.
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Rectangle {
        Rectangle { x, y, w, h }
    }

    /// Destructure this Rectangle into its component values (x, y, w, h).
    pub fn values(&self) -> (i32, i32, u32, u32) {
        (self.x, self.y, self.w, self.h)
    }
}

/// The subset of window attributes and geometry the window manager cares about.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WindowAttributes {
    pub override_redirect: bool,
    pub viewable: bool,
    pub region: Rectangle,
    pub border_width: u32,
}

/// Geometry and stacking changes for a window, as carried by a ConfigureRequest and as issued
/// back through `configure_window`. Only fields whose bit is set in `value_mask` are applied.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WindowChanges {
    pub id: Window,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
    pub sibling: Window,
    pub stack_mode: u8,
    pub value_mask: u16,
}

impl WindowChanges {
    /// The (mask, value) pairs selected by `value_mask`, in protocol order.
    pub fn values(&self) -> Vec<(u16, u32)> {
        vec![
            (CONFIG_WINDOW_X, self.x as u32),
            (CONFIG_WINDOW_Y, self.y as u32),
            (CONFIG_WINDOW_WIDTH, self.width),
            (CONFIG_WINDOW_HEIGHT, self.height),
            (CONFIG_WINDOW_BORDER_WIDTH, self.border_width),
            (CONFIG_WINDOW_SIBLING, self.sibling),
            (CONFIG_WINDOW_STACK_MODE, u32::from(self.stack_mode)),
        ]
        .into_iter()
        .filter(|&(mask, _)| mask & self.value_mask != 0)
        .collect()
    }
}

/**
 * Wrapper around the low level XCB event types that require casting to work with.
 * Only the event kinds the dispatcher acts on get their own variant; everything else
 * arrives as `Unknown` carrying the raw type code.
 *
 * https://tronche.com/gui/x/xlib/events/types.html
 */
#[derive(Debug, Clone, PartialEq)]
pub enum XEvent {
    /// xcb docs: https://www.mankier.com/3/xcb_button_press_event_t
    ButtonPress {
        id: Window,
        child: Window,
        button: u8,
        state: u16,
        /// Absolute coordinate of the event
        rpt: Point,
        /// Coordinate of the event relative to top-left of the window itself
        wpt: Point,
    },

    /// xcb docs: https://www.mankier.com/3/xcb_client_message_event_t
    ClientMessage {
        id: Window,
        atom: Atom,
        data: [u32; 5],
    },

    /// xcb docs: https://www.mankier.com/3/xcb_configure_request_event_t
    ConfigureRequest(WindowChanges),

    /// xcb docs: https://www.mankier.com/3/xcb_configure_notify_event_t
    ConfigureNotify {
        id: Window,
        r: Rectangle,
        is_root: bool,
    },

    /// xcb docs: https://www.mankier.com/3/xcb_destroy_notify_event_t
    DestroyNotify { id: Window },

    /// xcb docs: https://www.mankier.com/3/xcb_enter_notify_event_t
    EnterNotify {
        id: Window,
        rpt: Point,
        wpt: Point,
    },

    /// xcb docs: https://www.mankier.com/3/xcb_focus_in_event_t
    FocusIn { id: Window },

    /// xcb docs: https://www.mankier.com/3/xcb_key_press_event_t
    KeyPress {
        /// The X11 key code that was received along with any modifiers that were held
        code: XcbKey,
        /// Coordinate of the event relative to the window it was reported on
        wpt: Point,
    },

    /// xcb docs: https://www.mankier.com/3/xcb_map_request_event_t
    MapRequest { id: Window },

    /// xcb docs: https://www.mankier.com/3/xcb_property_notify_event_t
    PropertyNotify {
        id: Window,
        atom: Atom,
        is_root: bool,
        /// The property was deleted rather than changed
        deleted: bool,
    },

    /// xcb docs: https://www.mankier.com/3/xcb_unmap_notify_event_t
    UnmapNotify { id: Window },

    /// An error reply to a request that was sent unchecked.
    ProtocolError { code: u8 },

    /// Anything we have no handler for.
    Unknown { code: u8 },
}

/**
 * A handle on a running X11 connection.
 *
 * Every request the window manager issues goes through this trait so that the state tracking
 * in [crate::wm::WindowManager] can be driven by a fake server in tests.
 */
pub trait XConn {
    /// The root window of the managed screen
    fn root(&self) -> Window;

    /// Pixel size of the managed screen at connection time
    fn screen_size(&self) -> (u32, u32);

    fn atoms(&self) -> &InternedAtoms;

    /// Flush pending requests to the X server
    fn flush(&self) -> bool;

    /// Block until every request sent so far has been processed by the server
    fn sync(&self);

    /// Return the next queued event without blocking
    fn poll_for_event(&self) -> Option<XEvent>;

    /// Subscribe the root window to `mask`. Fails if another client owns substructure redirect.
    fn select_root_events(&self, mask: u32) -> Result<()>;

    fn select_window_events(&self, id: Window, mask: u32);

    /// Children of the root window, bottom to top
    fn query_tree(&self) -> Result<Vec<Window>>;

    fn window_attributes(&self, id: Window) -> Result<WindowAttributes>;

    /// The WM_TRANSIENT_FOR target of `id`, if it declares one
    fn transient_for(&self, id: Window) -> Option<Window>;

    /// A text property of a window; `None` when it is unset or unreadable
    fn text_property(&self, id: Window, atom: Atom) -> Option<String>;

    /// WM_CLASS as (instance, class)
    fn wm_class(&self, id: Window) -> Option<(String, String)>;

    /// Atoms listed in the WM_PROTOCOLS property of a window
    fn wm_protocols(&self, id: Window) -> Vec<Atom>;

    /// The eight modifier rows of the server's modifier map
    fn modifier_mapping(&self) -> Result<Vec<Vec<Keycode>>>;

    fn keysym_to_keycode(&self, keysym: Keysym) -> Option<Keycode>;

    fn keycode_to_keysym(&self, code: Keycode) -> Keysym;

    /// Grab a key on the root window, reporting a refused grab as an error
    fn grab_key(&self, key: &XcbKey) -> Result<()>;

    /// Release every key grab held on the root window
    fn ungrab_all_keys(&self);

    fn grab_any_button(&self, id: Window);

    fn ungrab_buttons(&self, id: Window);

    fn set_input_focus(&self, id: Window);

    /// Send a WM_PROTOCOLS client message carrying `atom`
    fn send_client_message(&self, id: Window, atom: Atom);

    /// Send a synthetic ConfigureNotify telling the window its geometry
    fn send_configure_notify(&self, id: Window, r: Rectangle, border_width: u32);

    fn configure_window(&self, changes: &WindowChanges);

    fn move_window(&self, id: Window, x: i32, y: i32);

    fn resize_window(&self, id: Window, w: u32, h: u32);

    fn move_resize_window(&self, id: Window, r: Rectangle);

    fn map_window(&self, id: Window);

    fn raise_window(&self, id: Window);

    /// Replace _NET_WM_STATE with either the fullscreen atom or nothing
    fn set_fullscreen_state(&self, id: Window, fullscreen: bool);

    /// Pointer position relative to the root window
    fn query_pointer(&self) -> Option<Point>;

    fn xinerama_active(&self) -> bool;

    fn xinerama_screens(&self) -> Result<Vec<Rectangle>>;

    fn grab_server(&self);

    fn ungrab_server(&self);

    /// Forcibly disconnect the client owning `id`, destroying all its resources
    fn kill_client(&self, id: Window) -> Result<()>;
}

/// Handles communication with an X server via xcb
pub struct XcbConnection {
    conn: ewmh::Connection,
    root: Window,
    screen_size: (u32, u32),
    atoms: InternedAtoms,
}

impl XcbConnection {
    /// Connect to `display`, or to `$DISPLAY` when `None`.
    pub fn new(display: Option<&str>) -> Result<XcbConnection> {
        let (conn, preferred_screen) = xcb::Connection::connect(display).with_context(|| {
            format!(
                "Unable to connect to X server {}",
                display.unwrap_or("(default display)")
            )
        })?;
        let conn = ewmh::Connection::connect(conn)
            .map_err(|(e, _)| anyhow!("EWMH setup failed with error code {}", e.error_code()))?;

        let (root, screen_size) = {
            let screen = conn
                .get_setup()
                .roots()
                .nth(preferred_screen as usize)
                .context("Unable to get the root window of the preferred screen")?;
            (
                screen.root(),
                (
                    u32::from(screen.width_in_pixels()),
                    u32::from(screen.height_in_pixels()),
                ),
            )
        };

        let atoms = InternedAtoms::new(&conn).context("Failed to intern atoms")?;
        info!(
            "connected to X server: root {} screen {}x{}",
            root, screen_size.0, screen_size.1
        );

        Ok(XcbConnection {
            conn,
            root,
            screen_size,
            atoms,
        })
    }

    /// Fails once the connection to the server has been shut down by an I/O or protocol error.
    pub fn check(&self) -> Result<()> {
        self.conn
            .has_error()
            .context("Connection to the X server was lost")
    }

    fn translate(&self, event: xcb::GenericEvent) -> XEvent {
        let etype = event.response_type() & XCB_RESPONSE_TYPE_MASK;
        match etype {
            0 => {
                let e: &xcb::GenericError = unsafe { xcb::cast_event(&event) };
                XEvent::ProtocolError {
                    code: e.error_code(),
                }
            }

            xcb::BUTTON_PRESS => {
                let e: &xcb::ButtonPressEvent = unsafe { xcb::cast_event(&event) };
                XEvent::ButtonPress {
                    id: e.event(),
                    child: e.child(),
                    button: e.detail(),
                    state: e.state(),
                    rpt: Point::new(i32::from(e.root_x()), i32::from(e.root_y())),
                    wpt: Point::new(i32::from(e.event_x()), i32::from(e.event_y())),
                }
            }

            xcb::CLIENT_MESSAGE => {
                let e: &xcb::ClientMessageEvent = unsafe { xcb::cast_event(&event) };
                let mut data = [0; 5];
                if e.format() == 32 {
                    data.copy_from_slice(e.data().data32());
                }
                XEvent::ClientMessage {
                    id: e.window(),
                    atom: e.type_(),
                    data,
                }
            }

            xcb::CONFIGURE_REQUEST => {
                let e: &xcb::ConfigureRequestEvent = unsafe { xcb::cast_event(&event) };
                XEvent::ConfigureRequest(WindowChanges {
                    id: e.window(),
                    x: i32::from(e.x()),
                    y: i32::from(e.y()),
                    width: u32::from(e.width()),
                    height: u32::from(e.height()),
                    border_width: u32::from(e.border_width()),
                    sibling: e.sibling(),
                    stack_mode: e.stack_mode(),
                    value_mask: e.value_mask(),
                })
            }

            xcb::CONFIGURE_NOTIFY => {
                let e: &xcb::ConfigureNotifyEvent = unsafe { xcb::cast_event(&event) };
                XEvent::ConfigureNotify {
                    id: e.window(),
                    r: Rectangle::new(
                        i32::from(e.x()),
                        i32::from(e.y()),
                        u32::from(e.width()),
                        u32::from(e.height()),
                    ),
                    is_root: e.window() == self.root,
                }
            }

            xcb::DESTROY_NOTIFY => {
                let e: &xcb::DestroyNotifyEvent = unsafe { xcb::cast_event(&event) };
                XEvent::DestroyNotify { id: e.window() }
            }

            xcb::ENTER_NOTIFY => {
                let e: &xcb::EnterNotifyEvent = unsafe { xcb::cast_event(&event) };
                XEvent::EnterNotify {
                    id: e.event(),
                    rpt: Point::new(i32::from(e.root_x()), i32::from(e.root_y())),
                    wpt: Point::new(i32::from(e.event_x()), i32::from(e.event_y())),
                }
            }

            xcb::FOCUS_IN => {
                let e: &xcb::FocusInEvent = unsafe { xcb::cast_event(&event) };
                XEvent::FocusIn { id: e.event() }
            }

            xcb::KEY_PRESS => {
                let e: &xcb::KeyPressEvent = unsafe { xcb::cast_event(&event) };
                XEvent::KeyPress {
                    code: XcbKey::from_key_press(e),
                    wpt: Point::new(i32::from(e.event_x()), i32::from(e.event_y())),
                }
            }

            xcb::MAP_REQUEST => {
                let e: &xcb::MapRequestEvent = unsafe { xcb::cast_event(&event) };
                XEvent::MapRequest { id: e.window() }
            }

            xcb::PROPERTY_NOTIFY => {
                let e: &xcb::PropertyNotifyEvent = unsafe { xcb::cast_event(&event) };
                XEvent::PropertyNotify {
                    id: e.window(),
                    atom: e.atom(),
                    is_root: e.window() == self.root,
                    deleted: u32::from(e.state()) == xcb::PROPERTY_DELETE,
                }
            }

            xcb::UNMAP_NOTIFY => {
                let e: &xcb::UnmapNotifyEvent = unsafe { xcb::cast_event(&event) };
                XEvent::UnmapNotify { id: e.window() }
            }

            code => XEvent::Unknown { code },
        }
    }
}

impl AsRawFd for XcbConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.conn.as_raw_fd()
    }
}

impl XConn for XcbConnection {
    fn root(&self) -> Window {
        self.root
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen_size
    }

    fn atoms(&self) -> &InternedAtoms {
        &self.atoms
    }

    fn flush(&self) -> bool {
        self.conn.flush()
    }

    fn sync(&self) {
        // any round trip will do
        if let Err(e) = xcb::get_input_focus(&self.conn).get_reply() {
            warn!("sync round trip failed with error code {}", e.error_code());
        }
    }

    fn poll_for_event(&self) -> Option<XEvent> {
        self.conn.poll_for_event().map(|e| self.translate(e))
    }

    fn select_root_events(&self, mask: u32) -> Result<()> {
        // Register for substructure redirection
        // https://jichu4n.com/posts/how-x-window-managers-work-and-how-to-write-one-part-i/#substructure-redirection
        xcb::change_window_attributes_checked(&self.conn, self.root, &[(xcb::CW_EVENT_MASK, mask)])
            .request_check()
            .map_err(|e| {
                anyhow!(
                    "Could not register for root window events (error code {}), is another window manager running?",
                    e.error_code()
                )
            })
    }

    fn select_window_events(&self, id: Window, mask: u32) {
        xcb::change_window_attributes(&self.conn, id, &[(xcb::CW_EVENT_MASK, mask)]);
    }

    fn query_tree(&self) -> Result<Vec<Window>> {
        let reply = xcb::query_tree(&self.conn, self.root)
            .get_reply()
            .map_err(|e| anyhow!("query_tree failed with error code {}", e.error_code()))?;
        Ok(reply.children().to_vec())
    }

    fn window_attributes(&self, id: Window) -> Result<WindowAttributes> {
        let attrs_cookie = xcb::get_window_attributes(&self.conn, id);
        let geom_cookie = xcb::get_geometry(&self.conn, id);
        let attrs = attrs_cookie.get_reply().map_err(|e| {
            anyhow!("get_window_attributes({}) failed with error code {}", id, e.error_code())
        })?;
        let geom = geom_cookie.get_reply().map_err(|e| {
            anyhow!("get_geometry({}) failed with error code {}", id, e.error_code())
        })?;

        Ok(WindowAttributes {
            override_redirect: attrs.override_redirect(),
            viewable: u32::from(attrs.map_state()) == xcb::MAP_STATE_VIEWABLE,
            region: Rectangle::new(
                i32::from(geom.x()),
                i32::from(geom.y()),
                u32::from(geom.width()),
                u32::from(geom.height()),
            ),
            border_width: u32::from(geom.border_width()),
        })
    }

    fn transient_for(&self, id: Window) -> Option<Window> {
        xcb::get_property(
            &self.conn,
            false,
            id,
            xcb::ATOM_WM_TRANSIENT_FOR,
            xcb::ATOM_WINDOW,
            0,
            1,
        )
        .get_reply()
        .ok()
        .and_then(|r| r.value::<Window>().first().copied())
        .filter(|&w| w != xcb::NONE)
    }

    fn text_property(&self, id: Window, atom: Atom) -> Option<String> {
        if atom == self.atoms._NET_WM_NAME {
            ewmh::get_wm_name(&self.conn, id)
                .get_reply()
                .ok()
                .map(|r| r.string().to_string())
        } else {
            icccm::get_text_property(&self.conn, id, atom)
                .get_reply()
                .ok()
                .map(|r| r.name().to_string())
        }
    }

    fn wm_class(&self, id: Window) -> Option<(String, String)> {
        icccm::get_wm_class(&self.conn, id)
            .get_reply()
            .ok()
            .map(|r| (r.instance().to_string(), r.class().to_string()))
    }

    fn wm_protocols(&self, id: Window) -> Vec<Atom> {
        icccm::get_wm_protocols(&self.conn, id, self.atoms.WM_PROTOCOLS)
            .get_reply()
            .map(|r| r.atoms().to_vec())
            .unwrap_or_default()
    }

    fn modifier_mapping(&self) -> Result<Vec<Vec<Keycode>>> {
        let reply = xcb::get_modifier_mapping(&self.conn)
            .get_reply()
            .map_err(|e| anyhow!("get_modifier_mapping failed with error code {}", e.error_code()))?;
        let per_modifier = usize::from(reply.keycodes_per_modifier()).max(1);
        Ok(reply
            .keycodes()
            .chunks(per_modifier)
            .map(|row| row.to_vec())
            .collect())
    }

    fn keysym_to_keycode(&self, keysym: Keysym) -> Option<Keycode> {
        KeySymbols::new(&self.conn).get_keycode(keysym).next()
    }

    fn keycode_to_keysym(&self, code: Keycode) -> Keysym {
        KeySymbols::new(&self.conn).get_keysym(code, 0)
    }

    fn grab_key(&self, key: &XcbKey) -> Result<()> {
        // xcb docs: https://www.mankier.com/3/xcb_grab_key
        xcb::grab_key_checked(
            &self.conn,      // xcb connection to X11
            true,            // report the event relative to the window it happened in
            self.root,       // the window to grab: in this case the root window
            key.mod_mask,    // modifiers to grab
            key.code,        // keycode to grab
            GRAB_MODE_ASYNC, // don't lock pointer input while grabbing
            GRAB_MODE_ASYNC, // don't lock keyboard input while grabbing
        )
        .request_check()
        .map_err(|e| anyhow!("grab of {:?} refused with error code {}", key, e.error_code()))
    }

    fn ungrab_all_keys(&self) {
        // xcb docs: https://www.mankier.com/3/xcb_ungrab_key
        xcb::ungrab_key(
            &self.conn,
            xcb::GRAB_ANY as u8,
            self.root,
            xcb::MOD_MASK_ANY as u16,
        );
    }

    fn grab_any_button(&self, id: Window) {
        // xcb docs: https://www.mankier.com/3/xcb_grab_button
        xcb::grab_button(
            &self.conn,
            false,
            id,
            BUTTON_MASK,
            GRAB_MODE_ASYNC,
            GRAB_MODE_ASYNC,
            xcb::NONE, // don't confine the cursor to a specific window
            xcb::NONE, // don't change the cursor type
            xcb::BUTTON_INDEX_ANY as u8,
            xcb::MOD_MASK_ANY as u16,
        );
    }

    fn ungrab_buttons(&self, id: Window) {
        xcb::ungrab_button(
            &self.conn,
            xcb::BUTTON_INDEX_ANY as u8,
            id,
            xcb::MOD_MASK_ANY as u16,
        );
    }

    fn set_input_focus(&self, id: Window) {
        xcb::set_input_focus(
            &self.conn,
            INPUT_FOCUS_POINTER_ROOT,
            id,
            xcb::CURRENT_TIME, // current time to avoid network race conditions
        );
    }

    fn send_client_message(&self, id: Window, atom: Atom) {
        let data = xcb::ClientMessageData::from_data32([atom, xcb::CURRENT_TIME, 0, 0, 0]);
        let event = xcb::ClientMessageEvent::new(32, id, self.atoms.WM_PROTOCOLS, data);
        xcb::send_event(&self.conn, false, id, xcb::EVENT_MASK_NO_EVENT, &event);
    }

    fn send_configure_notify(&self, id: Window, r: Rectangle, border_width: u32) {
        let event = xcb::ConfigureNotifyEvent::new(
            id,
            id,
            xcb::NONE,
            r.x as i16,
            r.y as i16,
            r.w as u16,
            r.h as u16,
            border_width as u16,
            false,
        );
        xcb::send_event(
            &self.conn,
            false,
            id,
            xcb::EVENT_MASK_STRUCTURE_NOTIFY,
            &event,
        );
    }

    fn configure_window(&self, changes: &WindowChanges) {
        xcb::configure_window(&self.conn, changes.id, &changes.values());
    }

    fn move_window(&self, id: Window, x: i32, y: i32) {
        xcb::configure_window(
            &self.conn,
            id,
            &[(CONFIG_WINDOW_X, x as u32), (CONFIG_WINDOW_Y, y as u32)],
        );
    }

    fn resize_window(&self, id: Window, w: u32, h: u32) {
        xcb::configure_window(
            &self.conn,
            id,
            &[(CONFIG_WINDOW_WIDTH, w), (CONFIG_WINDOW_HEIGHT, h)],
        );
    }

    fn move_resize_window(&self, id: Window, r: Rectangle) {
        xcb::configure_window(
            &self.conn,
            id,
            &[
                (CONFIG_WINDOW_X, r.x as u32),
                (CONFIG_WINDOW_Y, r.y as u32),
                (CONFIG_WINDOW_WIDTH, r.w),
                (CONFIG_WINDOW_HEIGHT, r.h),
            ],
        );
    }

    fn map_window(&self, id: Window) {
        xcb::map_window(&self.conn, id);
    }

    fn raise_window(&self, id: Window) {
        xcb::configure_window(
            &self.conn,
            id,
            &[(CONFIG_WINDOW_STACK_MODE, xcb::STACK_MODE_ABOVE as u32)],
        );
    }

    fn set_fullscreen_state(&self, id: Window, fullscreen: bool) {
        let value: &[Atom] = if fullscreen {
            &[self.atoms._NET_WM_STATE_FULLSCREEN]
        } else {
            &[]
        };
        xcb::change_property(
            &self.conn,
            PROP_MODE_REPLACE,
            id,
            self.atoms._NET_WM_STATE,
            xcb::ATOM_ATOM,
            32,
            value,
        );
    }

    fn query_pointer(&self) -> Option<Point> {
        xcb::query_pointer(&self.conn, self.root)
            .get_reply()
            .ok()
            .map(|r| Point::new(i32::from(r.root_x()), i32::from(r.root_y())))
    }

    fn xinerama_active(&self) -> bool {
        xinerama::is_active(&self.conn)
            .get_reply()
            .map(|r| r.state() != 0)
            .unwrap_or(false)
    }

    fn xinerama_screens(&self) -> Result<Vec<Rectangle>> {
        let screens = xinerama::query_screens(&self.conn)
            .get_reply()
            .map_err(|e| anyhow!("Xinerama query screens failed with error code {}", e.error_code()))?;
        Ok(screens
            .screen_info()
            .map(|s| {
                Rectangle::new(
                    i32::from(s.x_org()),
                    i32::from(s.y_org()),
                    u32::from(s.width()),
                    u32::from(s.height()),
                )
            })
            .collect())
    }

    fn grab_server(&self) {
        xcb::grab_server(&self.conn);
    }

    fn ungrab_server(&self) {
        xcb::ungrab_server(&self.conn);
    }

    fn kill_client(&self, id: Window) -> Result<()> {
        xcb::set_close_down_mode(&self.conn, CLOSE_DOWN_DESTROY_ALL);
        // checked, so the error lands here rather than in the event queue
        xcb::kill_client_checked(&self.conn, id)
            .request_check()
            .map_err(|e| anyhow!("kill_client({}) failed with error code {}", id, e.error_code()))
    }
}

/// Holds the server grabbed for as long as it lives.
pub struct ServerGrab<'a, C: XConn> {
    conn: &'a C,
}

impl<'a, C: XConn> ServerGrab<'a, C> {
    pub fn new(conn: &'a C) -> ServerGrab<'a, C> {
        conn.grab_server();
        ServerGrab { conn }
    }
}

impl<'a, C: XConn> Drop for ServerGrab<'a, C> {
    fn drop(&mut self) {
        self.conn.ungrab_server();
        self.conn.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_changes_only_emit_masked_values() {
        let changes = WindowChanges {
            id: 7,
            x: -10,
            y: 20,
            width: 300,
            height: 200,
            border_width: 1,
            sibling: 0,
            stack_mode: 0,
            value_mask: CONFIG_WINDOW_X | CONFIG_WINDOW_HEIGHT,
        };
        assert_eq!(
            changes.values(),
            vec![(CONFIG_WINDOW_X, -10i32 as u32), (CONFIG_WINDOW_HEIGHT, 200)]
        );
    }

    #[test]
    fn root_mask_includes_redirect() {
        assert_ne!(ROOT_EVENT_MASK & xcb::EVENT_MASK_SUBSTRUCTURE_REDIRECT, 0);
        assert_ne!(ROOT_EVENT_MASK & xcb::EVENT_MASK_PROPERTY_CHANGE, 0);
    }

    #[test]
    fn server_grab_is_released_on_drop() {
        let conn = crate::mock::RecordingConn::new();
        {
            let _grab = ServerGrab::new(&conn);
            assert!(conn.server_grabbed());
        }
        assert!(!conn.server_grabbed());
    }
}
