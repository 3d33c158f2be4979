pub mod cookie_refresh;
pub mod cookie_utils;
pub mod qr_login;

pub use cookie_refresh::{
    CookieRefreshError, CookieStatus, PassportEndpoints, RefreshedCookies, check_cookie_status,
    fetch_refresh_csrf, generate_correspond_path, refresh_cookies, validate_cookies,
};
