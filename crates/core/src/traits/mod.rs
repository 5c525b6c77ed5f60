pub mod repository;
pub mod scheduler;
pub mod scraper;

pub use repository::{TaskPage, TaskRepository};
pub use scheduler::{ClusterCallbackHandler, WorkerTaskReceiver};
pub use scraper::{FnScraper, RunOptions, Scraper, ScraperError};
