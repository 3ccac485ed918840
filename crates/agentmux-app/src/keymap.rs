//! Translation of terminal-mode key events into the byte sequences a child
//! PTY expects. Control-plane chords are matched in the reducer before this
//! encoding is consulted.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// xterm-style modifier parameter: 1 + shift(1) + alt(2) + ctrl(4).
fn modifier_code(modifiers: KeyModifiers) -> u8 {
    let mut code = 1;
    if modifiers.contains(KeyModifiers::SHIFT) {
        code += 1;
    }
    if modifiers.contains(KeyModifiers::ALT) {
        code += 2;
    }
    if modifiers.contains(KeyModifiers::CONTROL) {
        code += 4;
    }
    code
}

fn csi_seq(finalizer: char, modifiers: KeyModifiers) -> Vec<u8> {
    let code = modifier_code(modifiers);
    if code == 1 {
        format!("\x1b[{finalizer}").into_bytes()
    } else {
        format!("\x1b[1;{code}{finalizer}").into_bytes()
    }
}

fn tilde_seq(number: u8, modifiers: KeyModifiers) -> Vec<u8> {
    let code = modifier_code(modifiers);
    if code == 1 {
        format!("\x1b[{number}~").into_bytes()
    } else {
        format!("\x1b[{number};{code}~").into_bytes()
    }
}

/// Encodes a key for the PTY, or `None` when the key has no terminal
/// byte representation. Plain characters are not handled here; they flow
/// through the IME buffer instead.
pub fn encode_key(key: &KeyEvent) -> Option<Vec<u8>> {
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    let base: Vec<u8> = match key.code {
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => return Some(csi_seq('A', key.modifiers)),
        KeyCode::Down => return Some(csi_seq('B', key.modifiers)),
        KeyCode::Right => return Some(csi_seq('C', key.modifiers)),
        KeyCode::Left => return Some(csi_seq('D', key.modifiers)),
        KeyCode::Home => return Some(csi_seq('H', key.modifiers)),
        KeyCode::End => return Some(csi_seq('F', key.modifiers)),
        KeyCode::PageUp => return Some(tilde_seq(5, key.modifiers)),
        KeyCode::PageDown => return Some(tilde_seq(6, key.modifiers)),
        KeyCode::Insert => return Some(tilde_seq(2, key.modifiers)),
        KeyCode::Delete => return Some(tilde_seq(3, key.modifiers)),
        KeyCode::Char(c) if ctrl => {
            let lower = c.to_ascii_lowercase();
            match lower {
                'a'..='z' => vec![(lower as u8) - b'a' + 1],
                '[' => vec![0x1b],
                '\\' => vec![0x1c],
                ']' => vec![0x1d],
                '^' => vec![0x1e],
                '_' => vec![0x1f],
                '?' => vec![0x7f],
                ' ' => vec![0x00],
                _ => return None,
            }
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        _ => return None,
    };

    if alt {
        let mut prefixed = Vec::with_capacity(base.len() + 1);
        prefixed.push(0x1b);
        prefixed.extend_from_slice(&base);
        Some(prefixed)
    } else {
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn enter_submits_with_carriage_return() {
        assert_eq!(
            encode_key(&key(KeyCode::Enter, KeyModifiers::NONE)),
            Some(vec![b'\r'])
        );
    }

    #[test]
    fn plain_and_modified_arrows() {
        assert_eq!(
            encode_key(&key(KeyCode::Up, KeyModifiers::NONE)),
            Some(b"\x1b[A".to_vec())
        );
        assert_eq!(
            encode_key(&key(KeyCode::Right, KeyModifiers::SHIFT)),
            Some(b"\x1b[1;2C".to_vec())
        );
        assert_eq!(
            encode_key(&key(KeyCode::Left, KeyModifiers::CONTROL)),
            Some(b"\x1b[1;5D".to_vec())
        );
    }

    #[test]
    fn control_characters_map_to_low_bytes() {
        assert_eq!(
            encode_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(vec![0x03])
        );
        assert_eq!(
            encode_key(&key(KeyCode::Char('d'), KeyModifiers::CONTROL)),
            Some(vec![0x04])
        );
    }

    #[test]
    fn alt_prefixes_escape() {
        assert_eq!(
            encode_key(&key(KeyCode::Char('x'), KeyModifiers::ALT)),
            Some(vec![0x1b, b'x'])
        );
    }

    #[test]
    fn paging_keys_use_tilde_sequences() {
        assert_eq!(
            encode_key(&key(KeyCode::PageUp, KeyModifiers::NONE)),
            Some(b"\x1b[5~".to_vec())
        );
        assert_eq!(
            encode_key(&key(KeyCode::Delete, KeyModifiers::NONE)),
            Some(b"\x1b[3~".to_vec())
        );
    }

    #[test]
    fn multibyte_characters_encode_as_utf8() {
        assert_eq!(
            encode_key(&key(KeyCode::Char('你'), KeyModifiers::NONE)),
            Some("你".as_bytes().to_vec())
        );
    }
}
