//! The options for the `caboot` command line client.

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug};
use url::Url;

use super::{
    Context,
    report::{CertificateInfo, ClaimsInfo, Outcome, ReportFormat, RootInfo, TokenInfo},
};
use crate::{
    cert::{CertificateRequest, ClientIdentity, Csr, KeyType},
    client::{self, endpoint},
    commons::error::Error,
    constants::{CA_PATH_SIGN, CABOOT_CLIENT_APP, CABOOT_ENV_CA_URL, CABOOT_ENV_CONFIG, CABOOT_ENV_ROOT},
    token::{self, TimeSpec, TokenRequest},
    trust,
};

//------------ Options -------------------------------------------------------

/// The command line options for the caboot client.
#[derive(clap::Parser)]
#[command(
    name = CABOOT_CLIENT_APP,
    version,
    about = "Bootstraps trust in a certificate authority and gets certificates from it."
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

/// The options common to all commands.
#[derive(clap::Args)]
pub struct GeneralOptions {
    /// Path to the config file.
    #[arg(long, short, global = true, env = CABOOT_ENV_CONFIG, value_name = "path")]
    pub config: Option<PathBuf>,

    /// URI of the targeted certificate authority.
    #[arg(long, global = true, env = CABOOT_ENV_CA_URL, value_name = "URI")]
    pub ca_url: Option<Url>,

    /// Path to the PEM file used as the root certificate authority.
    #[arg(long, global = true, env = CABOOT_ENV_ROOT, value_name = "path")]
    pub root: Option<PathBuf>,

    /// Report format
    #[arg(short, long, global = true, default_value = "text", value_name = "text|json")]
    pub format: ReportFormat,

    /// Log level, overrides the config file.
    #[arg(long, global = true, value_name = "level")]
    pub log_level: Option<LevelFilter>,
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Download and pin the root certificate of a CA.
    Root(Root),

    /// Mint a one-time token for a certificate.
    Token(Token),

    /// Generate a key and get a certificate for it.
    Certificate(Certificate),

    /// Get a certificate for an existing CSR.
    Sign(Sign),

    /// Renew a certificate using the certificate itself.
    Renew(Renew),

    /// Check a token against a provisioner key and show its claims.
    VerifyToken(VerifyToken),
}

impl Command {
    pub async fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        match self {
            Self::Root(cmd) => cmd.run(ctx).await,
            Self::Token(cmd) => cmd.run(ctx),
            Self::Certificate(cmd) => cmd.run(ctx).await,
            Self::Sign(cmd) => cmd.run(ctx).await,
            Self::Renew(cmd) => cmd.run(ctx).await,
            Self::VerifyToken(cmd) => cmd.run(ctx),
        }
    }
}

//------------ Provisioner ---------------------------------------------------

/// Options that identify a provisioner and its key.
#[derive(clap::Args)]
pub struct ProvisionerArgs {
    /// The provisioner key id to use.
    #[arg(long, value_name = "kid")]
    pub kid: Option<String>,

    /// The provisioner name to use.
    #[arg(long, value_name = "name")]
    pub issuer: Option<String>,

    /// Path to the provisioner's PEM key.
    #[arg(long, value_name = "path", conflicts_with = "secret_file")]
    pub key: Option<PathBuf>,

    /// Path to the provisioner's shared secret.
    #[arg(long, value_name = "path")]
    pub secret_file: Option<PathBuf>,

    /// Path to the file holding the password to decrypt the key.
    #[arg(long, value_name = "path")]
    pub password_file: Option<PathBuf>,
}

//------------ Root ----------------------------------------------------------

#[derive(clap::Args)]
pub struct Root {
    /// Where to save the root certificate.
    #[arg(value_name = "root-file")]
    pub root_file: PathBuf,

    /// The SHA-256 fingerprint of the root certificate.
    #[arg(long, value_name = "fingerprint")]
    pub fingerprint: Option<String>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl Root {
    pub async fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let ca_url = ctx.ca_url()?;
        let fingerprint = ctx.fingerprint(self.fingerprint)?;

        let root = trust::bootstrap(ctx.transport(), &ca_url, &fingerprint).await?;
        root.save(&self.root_file, self.force)?;

        Ok(Outcome::Root(RootInfo::new(&root, self.root_file)))
    }
}

//------------ Token ---------------------------------------------------------

#[derive(clap::Args)]
pub struct Token {
    /// The subject the certificate will be for.
    #[arg(value_name = "subject")]
    pub subject: String,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,

    /// When the token becomes valid: an RFC 3339 time or a duration from
    /// now such as -1m.
    #[arg(long, allow_hyphen_values = true, value_name = "time|duration")]
    pub not_before: Option<TimeSpec>,

    /// When the token expires: an RFC 3339 time or a duration from now
    /// such as 5m.
    #[arg(long, allow_hyphen_values = true, value_name = "time|duration")]
    pub not_after: Option<TimeSpec>,

    /// Subject alternative names to request, may be repeated.
    #[arg(long = "san", value_name = "name")]
    pub sans: Vec<String>,
}

impl Token {
    pub fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let provisioner = ctx.provisioner(&self.provisioner)?;
        let key = ctx.signing_key(&self.provisioner)?;
        let passphrase = ctx.passphrase(&self.provisioner)?;

        let mut request = TokenRequest::new(self.subject).with_sans(self.sans);
        if let Some(not_before) = self.not_before {
            request = request.with_not_before(not_before);
        }
        if let Some(not_after) = self.not_after {
            request = request.with_not_after(not_after);
        }
        if let Ok(ca_url) = ctx.ca_url() {
            request = request.with_audience(endpoint(&ca_url, CA_PATH_SIGN));
        }

        let token = token::mint(
            &request,
            &provisioner,
            &key,
            passphrase.as_ref(),
            Utc::now(),
            &ctx.config().token_lifetime(),
        )?;
        Ok(Outcome::Token(TokenInfo::from(&token)))
    }
}

//------------ Certificate ---------------------------------------------------

#[derive(clap::Args)]
pub struct Certificate {
    /// The subject of the certificate.
    #[arg(value_name = "subject")]
    pub subject: String,

    /// Where to save the certificate.
    #[arg(value_name = "crt-file")]
    pub crt_file: PathBuf,

    /// Where to save the private key.
    #[arg(value_name = "key-file")]
    pub key_file: PathBuf,

    /// The one-time token to authenticate with.
    #[arg(long, value_name = "token")]
    pub token: String,

    /// The type of key to generate.
    #[arg(long, default_value = "ec-p256", value_name = "kty")]
    pub kty: KeyType,

    /// Subject alternative names, may be repeated. Defaults to the subject.
    #[arg(long = "san", value_name = "name")]
    pub sans: Vec<String>,

    /// Overwrite existing files.
    #[arg(long)]
    pub force: bool,
}

impl Certificate {
    pub async fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let ca_url = ctx.ca_url()?;
        let anchor = ctx.anchor()?;

        let request = CertificateRequest::new(self.subject)
            .with_key_type(self.kty)
            .with_sans(self.sans);
        let issued = client::sign(ctx.transport(), &ca_url, &anchor, &self.token, &request).await?;
        issued.save(&self.crt_file, Some(self.key_file.as_path()), self.force)?;

        Ok(Outcome::Certificate(CertificateInfo::new(
            &issued,
            self.crt_file,
            Some(self.key_file),
        )))
    }
}

//------------ Sign ----------------------------------------------------------

#[derive(clap::Args)]
pub struct Sign {
    /// The CSR to sign, PEM or DER.
    #[arg(value_name = "csr-file")]
    pub csr_file: PathBuf,

    /// Where to save the certificate.
    #[arg(value_name = "crt-file")]
    pub crt_file: PathBuf,

    /// The one-time token to authenticate with.
    #[arg(long, value_name = "token")]
    pub token: String,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl Sign {
    pub async fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let ca_url = ctx.ca_url()?;
        let anchor = ctx.anchor()?;
        let csr = Csr::load(&self.csr_file)?;

        let issued = client::sign_csr(ctx.transport(), &ca_url, &anchor, &self.token, &csr).await?;
        issued.save(&self.crt_file, None, self.force)?;

        Ok(Outcome::Certificate(CertificateInfo::new(&issued, self.crt_file, None)))
    }
}

//------------ Renew ---------------------------------------------------------

#[derive(clap::Args)]
pub struct Renew {
    /// The certificate to renew.
    #[arg(value_name = "crt-file")]
    pub crt_file: PathBuf,

    /// The private key of the certificate.
    #[arg(value_name = "key-file")]
    pub key_file: PathBuf,

    /// Path to the file holding the password to decrypt the key.
    #[arg(long, value_name = "path")]
    pub password_file: Option<PathBuf>,

    /// Where to save the renewed certificate. Defaults to the crt-file.
    #[arg(long, value_name = "path")]
    pub out: Option<PathBuf>,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

impl Renew {
    pub async fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let ca_url = ctx.ca_url()?;
        let anchor = ctx.anchor()?;
        let passphrase = ctx.read_passphrase(self.password_file.as_deref())?;
        let identity = ClientIdentity::load(&self.crt_file, &self.key_file, passphrase.as_ref())?;

        let renewed = client::renew(ctx.transport(), &ca_url, &anchor, &identity, Utc::now()).await?;

        let out = self.out.unwrap_or(self.crt_file);
        debug!("Saving renewed certificate to '{}'", out.display());
        renewed.save(&out, None, self.force)?;

        Ok(Outcome::Certificate(CertificateInfo::new(&renewed, out, None)))
    }
}

//------------ VerifyToken ---------------------------------------------------

#[derive(clap::Args)]
pub struct VerifyToken {
    /// The token to check.
    #[arg(value_name = "token")]
    pub token: String,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,
}

impl VerifyToken {
    pub fn run(self, ctx: &Context) -> Result<Outcome, Error> {
        let provisioner = ctx.provisioner(&self.provisioner)?;
        let key = ctx.verification_key(&self.provisioner)?;

        let claims = token::validate(&self.token, &provisioner, &key, Utc::now)?;
        Ok(Outcome::Claims(ClaimsInfo { valid: true, claims }))
    }
}
