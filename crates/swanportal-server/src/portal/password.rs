//! Password generation and display.

use rand::rngs::OsRng;
use rand::RngCore;

/// Password alphabet; visually ambiguous symbols are excluded.
pub const PASSWORD_ALPHABET: &[u8] = b"ABCDEFHKLMNPRTUVWXYZabcdefhkmnpqrstuvwxyz23478";
/// Generated password length.
pub const PASSWORD_LENGTH: usize = 20;

/// Generate a password, uniformly distributed over the alphabet.
///
/// Each symbol is drawn by rejection sampling: two random bytes are read
/// as a big-endian 16-bit value and redrawn when they fall into the tail
/// above the largest multiple of the alphabet size. Plain modulo would
/// bias the first `65536 mod 46` symbols.
pub fn generate_password() -> String {
    let accept_below = (65536 / PASSWORD_ALPHABET.len()) * PASSWORD_ALPHABET.len();
    let mut symbols = Vec::with_capacity(PASSWORD_LENGTH);
    let mut draw = [0u8; 2];

    while symbols.len() < PASSWORD_LENGTH {
        OsRng.fill_bytes(&mut draw);
        let value = u16::from_be_bytes(draw) as usize;
        if value < accept_below {
            symbols.push(PASSWORD_ALPHABET[value % PASSWORD_ALPHABET.len()]);
        }
    }

    String::from_utf8(symbols).expect("alphabet is ASCII")
}

/// Render a password as HTML with per-character-class coloring.
///
/// Digits red, lowercase blue, uppercase green; anything else is emitted
/// bare.
pub fn colorize_password(password: &str) -> String {
    let mut html = String::with_capacity(password.len() * 32);

    for symbol in password.chars() {
        if symbol.is_ascii_digit() {
            html.push_str(&format!("<span class=\"text-red-800\">{symbol}</span>"));
        } else if symbol.is_ascii_lowercase() {
            html.push_str(&format!("<span class=\"text-blue-800\">{symbol}</span>"));
        } else if symbol.is_ascii_uppercase() {
            html.push_str(&format!("<span class=\"text-green-800\">{symbol}</span>"));
        } else {
            html.push(symbol);
        }
    }

    html
}
