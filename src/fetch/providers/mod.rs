pub mod calendar;
pub mod fixture;
pub mod rss;
pub mod youtube;
