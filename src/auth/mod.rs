//! Session cookies loaded from a browser-exported cookie jar.

mod cookies;

pub use cookies::{
    CookieError, CookieLine, ParseResult, load_cookie_file, load_cookies_into_jar,
    parse_netscape_cookies,
};
