//! The command line options of the fedmeta tool.

use std::path::PathBuf;

use crate::cli::report::ReportFormat;
use crate::constants::{
    FEDMETA_DEFAULT_CONFIG_FILE, FEDMETA_ENV_CONFIG, SAML20P_NS,
};
use crate::metadata::RoleType;

//------------ Options -------------------------------------------------------

/// Looks up entities in SAML metadata and checks peer credentials.
#[derive(clap::Parser, Debug)]
#[command(version, about = "Looks up SAML federation metadata.")]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won't result in usable options, exits the process.
    pub fn from_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

#[derive(clap::Args, Debug)]
pub struct GeneralOptions {
    /// The configuration file with the metadata providers.
    #[arg(
        short, long,
        env = FEDMETA_ENV_CONFIG,
        default_value = FEDMETA_DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Report format: json or text.
    #[arg(short, long, default_value = "json")]
    pub format: ReportFormat,
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Show an entity.
    Entity(Entity),

    /// Show a group of entities.
    Group(Group),

    /// Show the roles of an entity.
    Roles(Roles),

    /// Refresh all refreshable providers now.
    Refresh,

    /// Check whether a peer certificate is trusted.
    Verify(Verify),
}

#[derive(clap::Args, Debug)]
pub struct Entity {
    /// The entity ID.
    pub entity_id: String,
}

#[derive(clap::Args, Debug)]
pub struct Group {
    /// The name of the group.
    pub name: String,
}

#[derive(clap::Args, Debug)]
pub struct Roles {
    /// The entity ID.
    pub entity_id: String,

    /// The role type: idp, sp, aa, authn or pdp.
    #[arg(short, long)]
    pub role: RoleType,

    /// Only show the first role supporting this protocol.
    #[arg(short, long)]
    pub protocol: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct Verify {
    /// The name of the peer, usually its entity ID.
    #[arg(long)]
    pub peer: String,

    /// PEM file with the peer certificate, optionally followed by its chain.
    #[arg(long)]
    pub cert: PathBuf,

    /// Further PEM files with untrusted intermediate certificates.
    #[arg(long)]
    pub chain: Vec<PathBuf>,

    /// Compare against the signing keys the peer's role in the metadata
    /// declares, rather than building a path to the configured anchors.
    #[arg(long)]
    pub metadata_role: Option<RoleType>,

    /// The protocol the metadata role must support.
    #[arg(long, default_value = SAML20P_NS)]
    pub protocol: String,
}

//------------ Tests ---------------------------------------------------------
