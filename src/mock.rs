//! A scripted X server for driving the window manager in tests.
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    rc::Rc,
};

use anyhow::{anyhow, Result};

use crate::{
    ipc::{EventSink, WmEvent},
    xconnection::{
        Atom, InternedAtoms, Keycode, Keysym, Point, Rectangle, Window, WindowAttributes,
        WindowChanges, XConn, XEvent, XcbKey,
    },
};

pub const ROOT: Window = 1;
pub const NUM_LOCK_CODE: Keycode = 77;
pub const MOD2_MASK: u16 = 1 << 4;

/// A request recorded by [RecordingConn]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SelectEvents(Window, u32),
    GrabKey(XcbKey),
    UngrabAllKeys,
    GrabAnyButton(Window),
    UngrabButtons(Window),
    SetInputFocus(Window),
    SendClientMessage(Window, Atom),
    SendConfigureNotify(Window, Rectangle, u32),
    Configure(WindowChanges),
    Move(Window, i32, i32),
    Resize(Window, u32, u32),
    MoveResize(Window, Rectangle),
    Map(Window),
    Raise(Window),
    SetFullscreen(Window, bool),
    GrabServer,
    UngrabServer,
    KillClient(Window),
    Sync,
}

#[derive(Debug, Clone, Default)]
pub struct FakeWindow {
    pub override_redirect: bool,
    pub viewable: bool,
    pub region: Rectangle,
    pub border_width: u32,
    pub transient_for: Option<Window>,
    pub net_wm_name: Option<String>,
    pub wm_name: Option<String>,
    pub class: Option<(String, String)>,
    pub protocols: Vec<Atom>,
}

impl FakeWindow {
    pub fn viewable(region: Rectangle) -> FakeWindow {
        FakeWindow {
            viewable: true,
            region,
            border_width: 1,
            ..Default::default()
        }
    }
}

pub struct RecordingConn {
    atoms: InternedAtoms,
    pub windows: RefCell<HashMap<Window, FakeWindow>>,
    pub children: RefCell<Vec<Window>>,
    pub xinerama: RefCell<Option<Vec<Rectangle>>>,
    pub pointer: Cell<Option<Point>>,
    pub events: RefCell<VecDeque<XEvent>>,
    pub modmap: RefCell<Vec<Vec<Keycode>>>,
    pub keymap: RefCell<HashMap<Keysym, Keycode>>,
    pub refused_grabs: RefCell<HashSet<XcbKey>>,
    /// Act as if another window manager already selected substructure redirect
    pub refuse_root_events: Cell<bool>,
    calls: RefCell<Vec<Call>>,
    grabbed: Cell<bool>,
}

impl RecordingConn {
    pub fn new() -> RecordingConn {
        let mut modmap = vec![vec![]; 8];
        modmap[4] = vec![NUM_LOCK_CODE];
        let mut keymap = HashMap::new();
        keymap.insert(crate::bindings::XK_NUM_LOCK, NUM_LOCK_CODE);

        RecordingConn {
            atoms: InternedAtoms {
                WM_NAME: xcb::ATOM_WM_NAME,
                WM_PROTOCOLS: 301,
                WM_DELETE_WINDOW: 302,
                WM_TAKE_FOCUS: 303,
                _NET_WM_NAME: 305,
                _NET_WM_STATE: 306,
                _NET_WM_STATE_FULLSCREEN: 307,
            },
            windows: RefCell::new(HashMap::new()),
            children: RefCell::new(vec![]),
            xinerama: RefCell::new(None),
            pointer: Cell::new(Some(Point::new(5, 5))),
            events: RefCell::new(VecDeque::new()),
            modmap: RefCell::new(modmap),
            keymap: RefCell::new(keymap),
            refused_grabs: RefCell::new(HashSet::new()),
            refuse_root_events: Cell::new(false),
            calls: RefCell::new(vec![]),
            grabbed: Cell::new(false),
        }
    }

    /// Add a child of the root window
    pub fn add_window(&self, id: Window, w: FakeWindow) {
        self.windows.borrow_mut().insert(id, w);
        self.children.borrow_mut().push(id);
    }

    pub fn push_event(&self, e: XEvent) {
        self.events.borrow_mut().push_back(e);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn server_grabbed(&self) -> bool {
        self.grabbed.get()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    // requests that would stall behind a leaked server grab
    fn record_ungrabbed(&self, call: Call) {
        assert!(!self.grabbed.get(), "{:?} issued while the server is grabbed", call);
        self.record(call);
    }
}

impl XConn for RecordingConn {
    fn root(&self) -> Window {
        ROOT
    }

    fn screen_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn atoms(&self) -> &InternedAtoms {
        &self.atoms
    }

    fn flush(&self) -> bool {
        true
    }

    fn sync(&self) {
        self.record(Call::Sync);
    }

    fn poll_for_event(&self) -> Option<XEvent> {
        self.events.borrow_mut().pop_front()
    }

    fn select_root_events(&self, mask: u32) -> Result<()> {
        if self.refuse_root_events.get() {
            return Err(anyhow!("BadAccess selecting {:#x} on the root window", mask));
        }
        self.record(Call::SelectEvents(ROOT, mask));
        Ok(())
    }

    fn select_window_events(&self, id: Window, mask: u32) {
        self.record(Call::SelectEvents(id, mask));
    }

    fn query_tree(&self) -> Result<Vec<Window>> {
        Ok(self.children.borrow().clone())
    }

    fn window_attributes(&self, id: Window) -> Result<WindowAttributes> {
        self.windows
            .borrow()
            .get(&id)
            .map(|w| WindowAttributes {
                override_redirect: w.override_redirect,
                viewable: w.viewable,
                region: w.region,
                border_width: w.border_width,
            })
            .ok_or_else(|| anyhow!("BadWindow: {}", id))
    }

    fn transient_for(&self, id: Window) -> Option<Window> {
        self.windows.borrow().get(&id).and_then(|w| w.transient_for)
    }

    fn text_property(&self, id: Window, atom: Atom) -> Option<String> {
        let windows = self.windows.borrow();
        let w = windows.get(&id)?;
        if atom == self.atoms._NET_WM_NAME {
            w.net_wm_name.clone()
        } else if atom == self.atoms.WM_NAME {
            w.wm_name.clone()
        } else {
            None
        }
    }

    fn wm_class(&self, id: Window) -> Option<(String, String)> {
        self.windows.borrow().get(&id).and_then(|w| w.class.clone())
    }

    fn wm_protocols(&self, id: Window) -> Vec<Atom> {
        self.windows
            .borrow()
            .get(&id)
            .map(|w| w.protocols.clone())
            .unwrap_or_default()
    }

    fn modifier_mapping(&self) -> Result<Vec<Vec<Keycode>>> {
        Ok(self.modmap.borrow().clone())
    }

    fn keysym_to_keycode(&self, keysym: Keysym) -> Option<Keycode> {
        self.keymap.borrow().get(&keysym).copied()
    }

    fn keycode_to_keysym(&self, code: Keycode) -> Keysym {
        self.keymap
            .borrow()
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(&sym, _)| sym)
            .unwrap_or(0)
    }

    fn grab_key(&self, key: &XcbKey) -> Result<()> {
        if self.refused_grabs.borrow().contains(key) {
            return Err(anyhow!("BadAccess grabbing {:?}", key));
        }
        self.record(Call::GrabKey(*key));
        Ok(())
    }

    fn ungrab_all_keys(&self) {
        self.record(Call::UngrabAllKeys);
    }

    fn grab_any_button(&self, id: Window) {
        self.record(Call::GrabAnyButton(id));
    }

    fn ungrab_buttons(&self, id: Window) {
        self.record(Call::UngrabButtons(id));
    }

    fn set_input_focus(&self, id: Window) {
        self.record_ungrabbed(Call::SetInputFocus(id));
    }

    fn send_client_message(&self, id: Window, atom: Atom) {
        self.record(Call::SendClientMessage(id, atom));
    }

    fn send_configure_notify(&self, id: Window, r: Rectangle, border_width: u32) {
        self.record(Call::SendConfigureNotify(id, r, border_width));
    }

    fn configure_window(&self, changes: &WindowChanges) {
        self.record_ungrabbed(Call::Configure(*changes));
    }

    fn move_window(&self, id: Window, x: i32, y: i32) {
        self.record_ungrabbed(Call::Move(id, x, y));
    }

    fn resize_window(&self, id: Window, w: u32, h: u32) {
        self.record_ungrabbed(Call::Resize(id, w, h));
    }

    fn move_resize_window(&self, id: Window, r: Rectangle) {
        self.record_ungrabbed(Call::MoveResize(id, r));
    }

    fn map_window(&self, id: Window) {
        self.record(Call::Map(id));
    }

    fn raise_window(&self, id: Window) {
        self.record(Call::Raise(id));
    }

    fn set_fullscreen_state(&self, id: Window, fullscreen: bool) {
        self.record(Call::SetFullscreen(id, fullscreen));
    }

    fn query_pointer(&self) -> Option<Point> {
        self.pointer.get()
    }

    fn xinerama_active(&self) -> bool {
        self.xinerama.borrow().is_some()
    }

    fn xinerama_screens(&self) -> Result<Vec<Rectangle>> {
        self.xinerama
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("Xinerama is not active"))
    }

    fn grab_server(&self) {
        assert!(!self.grabbed.get(), "server grabbed twice");
        self.grabbed.set(true);
        self.record(Call::GrabServer);
    }

    fn ungrab_server(&self) {
        self.grabbed.set(false);
        self.record(Call::UngrabServer);
    }

    fn kill_client(&self, id: Window) -> Result<()> {
        self.record(Call::KillClient(id));
        // the client is gone before the request is processed
        Err(anyhow!("BadValue killing {}", id))
    }
}

/// An [EventSink] that appends into a shared buffer the test can inspect.
pub fn collecting_sink() -> (Box<dyn EventSink>, Rc<RefCell<Vec<WmEvent>>>) {
    let events = Rc::new(RefCell::new(vec![]));
    let inner = Rc::clone(&events);
    let sink = move |e: WmEvent| inner.borrow_mut().push(e);
    (Box::new(sink), events)
}
