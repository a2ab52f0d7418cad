use fedmeta::cli::{FedmetaClient, options::Options};

fn main() {
    if let Err(err) = FedmetaClient::report(Options::from_args()) {
        eprintln!("{}", err);
        ::std::process::exit(1);
    }
}
