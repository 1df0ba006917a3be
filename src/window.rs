use crate::xconnection::{Rectangle, Window};

/// Stand-in for a window title or class the client never set.
pub const PLACEHOLDER_NAME: &str = "broken";

/**
 * Meta-data around a window that we are managing.
 *
 * Geometry is what the window reported when it was taken over, then whatever the controller
 * last asked for.
 */
#[derive(Debug, PartialEq, Clone)]
pub struct ManagedWindow {
    id: Window,
    region: Rectangle,
    border_width: u32,
    title: String,
    class: String,
    instance: String,
    // state flags
    floating: bool,
    fullscreen: bool,
}

impl ManagedWindow {
    /// Track a newly managed window
    pub fn new(id: Window, region: Rectangle, border_width: u32, floating: bool) -> ManagedWindow {
        ManagedWindow {
            id,
            region,
            border_width,
            title: String::new(),
            class: String::new(),
            instance: String::new(),
            floating,
            fullscreen: false,
        }
    }

    /// The X window ID of this window
    pub fn id(&self) -> Window {
        self.id
    }

    pub fn region(&self) -> Rectangle {
        self.region
    }

    pub fn border_width(&self) -> u32 {
        self.border_width
    }

    /// Windows declaring WM_TRANSIENT_FOR float
    pub fn is_floating(&self) -> bool {
        self.floating
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The class half of WM_CLASS
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The instance half of WM_CLASS
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub(crate) fn set_names(&mut self, title: &str, class: &str, instance: &str) {
        self.title = title.to_string();
        self.class = class.to_string();
        self.instance = instance.to_string();
    }

    pub(crate) fn set_position(&mut self, x: i32, y: i32) {
        self.region.x = x;
        self.region.y = y;
    }

    pub(crate) fn set_size(&mut self, w: u32, h: u32) {
        self.region.w = w;
        self.region.h = h;
    }

    pub(crate) fn set_border_width(&mut self, border_width: u32) {
        self.border_width = border_width;
    }

    pub(crate) fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }
}

/// `value` unless it is missing or empty, in which case `placeholder`.
pub fn name_or<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => placeholder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_fall_back_to_the_placeholder() {
        assert_eq!(name_or(None, PLACEHOLDER_NAME), "broken");
        assert_eq!(name_or(Some(""), PLACEHOLDER_NAME), "broken");
        assert_eq!(name_or(Some("xterm"), PLACEHOLDER_NAME), "xterm");
    }

    #[test]
    fn geometry_updates_are_partial() {
        let mut w = ManagedWindow::new(3, Rectangle::new(0, 0, 100, 100), 1, false);
        w.set_position(10, 20);
        assert_eq!(w.region(), Rectangle::new(10, 20, 100, 100));
        w.set_size(640, 480);
        assert_eq!(w.region(), Rectangle::new(10, 20, 640, 480));
    }
}
