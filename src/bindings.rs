use std::collections::VecDeque;

use crate::xconnection::{Keycode, Keysym, XConn, XcbKey};

/// XK_Num_Lock
pub const XK_NUM_LOCK: Keysym = 0xff7f;

const LOCK_MASK: u16 = xcb::MOD_MASK_LOCK as u16;

/// A key symbol bound together with the modifiers that must be held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyBinding {
    pub keysym: Keysym,
    pub mod_mask: u16,
}

/**
 * The set of key bindings grabbed on the root window.
 *
 * Bindings are only ever added or cleared as a whole, and every (re)grab releases all keys
 * and grabs the full set again, so their order carries no meaning.
 */
#[derive(Debug, Default)]
pub struct Bindings {
    keys: VecDeque<KeyBinding>,
    numlock_mask: u16,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    pub fn add(&mut self, keysym: Keysym, mod_mask: u16) {
        self.keys.push_front(KeyBinding { keysym, mod_mask });
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyBinding> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Modifier bit currently carrying Num_Lock, 0 if it is not mapped
    pub fn numlock_mask(&self) -> u16 {
        self.numlock_mask
    }

    /// Strip the lock modifiers from a key event state
    pub fn clean_mask(&self, state: u16) -> u16 {
        state & !(self.numlock_mask | LOCK_MASK)
    }

    /// Release every key grab on the root window and grab the full binding set again, once
    /// per combination of Caps_Lock and Num_Lock so the lock state never matters.
    pub fn regrab<C: XConn>(&mut self, conn: &C) {
        self.numlock_mask = match conn.modifier_mapping() {
            Ok(map) => numlock_mask(&map, conn.keysym_to_keycode(XK_NUM_LOCK)),
            Err(e) => {
                warn!("unable to read the modifier map, assuming no numlock: {:#}", e);
                0
            }
        };
        debug!("numlock mask is {:#x}", self.numlock_mask);

        let modifiers = [
            0,
            LOCK_MASK,
            self.numlock_mask,
            self.numlock_mask | LOCK_MASK,
        ];
        conn.ungrab_all_keys();
        for binding in self.keys.iter() {
            let code = match conn.keysym_to_keycode(binding.keysym) {
                Some(code) => code,
                None => {
                    warn!("no keycode for keysym {:#x}, not grabbing it", binding.keysym);
                    continue;
                }
            };
            debug!(
                "grab key -- keysym: {:#x} modifier: {:#x}",
                binding.keysym, binding.mod_mask
            );
            for extra in modifiers.iter() {
                let key = XcbKey {
                    mod_mask: binding.mod_mask | extra,
                    code,
                };
                if let Err(e) = conn.grab_key(&key) {
                    warn!("{:#}", e);
                }
            }
        }
        conn.flush();
    }
}

/// Find the modifier bit whose row in the modifier map holds `numlock`.
pub fn numlock_mask(map: &[Vec<Keycode>], numlock: Option<Keycode>) -> u16 {
    let numlock = match numlock {
        Some(code) if code != 0 => code,
        _ => return 0,
    };
    map.iter()
        .take(8)
        .position(|row| row.contains(&numlock))
        .map(|i| 1 << i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, RecordingConn, MOD2_MASK, NUM_LOCK_CODE};

    const XK_RETURN: Keysym = 0xff0d;
    const MOD4: u16 = xcb::MOD_MASK_4 as u16;

    fn grabs(conn: &RecordingConn) -> Vec<XcbKey> {
        conn.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::GrabKey(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn numlock_mask_uses_first_matching_row() {
        let mut map = vec![vec![]; 8];
        map[2] = vec![0, 77];
        map[4] = vec![77];
        assert_eq!(numlock_mask(&map, Some(77)), 1 << 2);
        assert_eq!(numlock_mask(&map, Some(12)), 0);
        assert_eq!(numlock_mask(&map, None), 0);
    }

    #[test]
    fn regrab_grabs_every_lock_combination() {
        let conn = RecordingConn::new();
        conn.keymap.borrow_mut().insert(XK_RETURN, 36);
        let mut bindings = Bindings::new();
        bindings.add(XK_RETURN, MOD4);

        bindings.regrab(&conn);

        assert_eq!(bindings.numlock_mask(), MOD2_MASK);
        assert_eq!(conn.calls()[0], Call::UngrabAllKeys);
        let masks: Vec<u16> = grabs(&conn).iter().map(|k| k.mod_mask).collect();
        assert_eq!(
            masks,
            vec![MOD4, MOD4 | LOCK_MASK, MOD4 | MOD2_MASK, MOD4 | MOD2_MASK | LOCK_MASK]
        );
        assert!(grabs(&conn).iter().all(|k| k.code == 36));
    }

    #[test]
    fn regrab_is_idempotent() {
        let conn = RecordingConn::new();
        conn.keymap.borrow_mut().insert(XK_RETURN, 36);
        conn.keymap.borrow_mut().insert(0x71, 24);
        let mut bindings = Bindings::new();
        bindings.add(XK_RETURN, MOD4);
        bindings.add(0x71, MOD4 | xcb::MOD_MASK_SHIFT as u16);

        bindings.regrab(&conn);
        let first = conn.calls();
        conn.clear_calls();
        bindings.regrab(&conn);

        assert_eq!(conn.calls(), first);
        assert_eq!(grabs(&conn).len(), 8);
    }

    #[test]
    fn refused_grab_does_not_stop_the_rest() {
        let conn = RecordingConn::new();
        conn.keymap.borrow_mut().insert(XK_RETURN, 36);
        conn.refused_grabs.borrow_mut().insert(XcbKey {
            mod_mask: MOD4,
            code: 36,
        });
        let mut bindings = Bindings::new();
        bindings.add(XK_RETURN, MOD4);

        bindings.regrab(&conn);

        assert_eq!(grabs(&conn).len(), 3);
    }

    #[test]
    fn unknown_keysym_is_skipped() {
        let conn = RecordingConn::new();
        let mut bindings = Bindings::new();
        bindings.add(0x1234_5678, MOD4);
        bindings.regrab(&conn);
        assert!(grabs(&conn).is_empty());
    }

    #[test]
    fn clear_drops_all_bindings() {
        let conn = RecordingConn::new();
        conn.keymap.borrow_mut().insert(XK_RETURN, 36);
        let mut bindings = Bindings::new();
        bindings.add(XK_RETURN, MOD4);
        bindings.add(XK_RETURN, 0);
        assert_eq!(bindings.len(), 2);
        let masks: Vec<u16> = bindings.keys().map(|k| k.mod_mask).collect();
        assert_eq!(masks, vec![0, MOD4]);

        bindings.clear();
        bindings.regrab(&conn);

        assert!(bindings.is_empty());
        assert_eq!(conn.calls(), vec![Call::UngrabAllKeys]);
    }

    #[test]
    fn clean_mask_strips_lock_keys() {
        let conn = RecordingConn::new();
        let mut bindings = Bindings::new();
        bindings.regrab(&conn);
        let state = MOD4 | LOCK_MASK | MOD2_MASK;
        assert_eq!(bindings.clean_mask(state), MOD4);
        assert_eq!(NUM_LOCK_CODE, conn.keysym_to_keycode(XK_NUM_LOCK).unwrap());
    }
}
