pub mod ledger;
pub mod measurements;
pub mod paths;
