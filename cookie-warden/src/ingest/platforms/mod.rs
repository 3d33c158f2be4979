pub mod weibo;

pub use weibo::WeiboTimelineSource;
