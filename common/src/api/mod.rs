pub mod cosmos;
pub mod dashboard;
pub mod tendermint;
