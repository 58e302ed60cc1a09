//! Long-lived periodic workers
//!
//! Four drivers run for the life of the process:
//! - [`SearchScheduler`] — finds and grabs releases for wanted games and
//!   resets failed downloads ([`search`])
//! - [`RssSynchronizer`] — matches the aggregator's global feed against
//!   wanted games ([`rss_sync`])
//! - [`DownloadMonitor`] — reconciles daemon state into releases and games
//!   ([`monitor`])
//! - [`UpdateCheckJob`] — sweeps downloaded games for successor releases
//!   ([`update_job`])
//!
//! Each worker owns an `is_running` exclusion flag: a tick that would
//! overlap the previous one is skipped, never queued. Errors never escape
//! a tick; they are logged and the next tick retries naturally.

mod monitor;
mod rss_sync;
mod search;
mod update_job;

pub use monitor::DownloadMonitor;
pub use rss_sync::RssSynchronizer;
pub use search::SearchScheduler;
pub use update_job::UpdateCheckJob;
