pub mod options;
pub mod report;

mod client;
pub use self::client::Error;
pub use self::client::FedmetaClient;
