//! Concrete refresh strategies and session probes.

pub mod bilibili;
pub mod browser;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod weibo;

pub use bilibili::ChallengeResponseRefresher;
pub use browser::{
    BrowserCookie, BrowserDriver, BrowserRefresher, BrowserRefresherConfig, BrowserSession,
    SessionProbe,
};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumDriver;
pub use weibo::WeiboSessionProbe;
