//! Background threads around the ledger service.
//!
//! - [`NotificationWorker`]: drains a bus subscription into a handler
//! - [`BalanceRefresher`]: keeps the catalog's cached balances current
//! - [`ReservationSweeper`]: periodically deletes expired holds

mod balance_refresher;
mod notification_worker;
mod reservation_sweeper;

pub use balance_refresher::BalanceRefresher;
pub use notification_worker::{NotificationWorker, WorkerHandle};
pub use reservation_sweeper::{ReservationSweeper, SweeperConfig, SweeperHandle, SweeperStats};
