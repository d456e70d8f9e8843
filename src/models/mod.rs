pub mod bin;
pub mod ledger;
pub mod notification;
pub mod report;
pub mod reward;
pub mod route;
