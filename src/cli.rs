//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// Freva REST command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The port the API should listen on
    #[arg(long, default_value_t = 8080, env = "API_PORT")]
    pub port: u16,
    /// Number of worker threads of the async runtime. Default is the number of CPUs.
    #[arg(long, env = "API_WORKER")]
    pub workers: Option<usize>,
    /// The <HOSTNAME>:<PORT> this API binds to
    #[arg(long, default_value = "0.0.0.0", env = "API_URL")]
    pub host: String,
    /// URL of a proxy that serves this API (if any)
    #[arg(long, default_value = "", env = "API_PROXY")]
    pub proxy: String,
    /// Expiration time in seconds of the data loading cache
    #[arg(long, default_value_t = 3600, env = "API_CACHE_EXP")]
    pub cache_exp: u64,
    /// The <HOSTNAME>:<PORT> of the MongoDB service
    #[arg(long, default_value = "", env = "API_MONGO_HOST")]
    pub mongo_host: String,
    /// The MongoDB user name
    #[arg(long, default_value = "", env = "API_MONGO_USER")]
    pub mongo_user: String,
    /// The MongoDB password
    #[arg(long, default_value = "", env = "API_MONGO_PASSWORD")]
    pub mongo_password: String,
    /// Name of the Mongo database that is used
    #[arg(long, default_value = "", env = "API_MONGO_DB")]
    pub mongo_db: String,
    /// The <HOSTNAME>:<PORT> of the Solr service
    #[arg(long, default_value = "", env = "API_SOLR_HOST")]
    pub solr_host: String,
    /// Name of the Solr core holding the multi-version search index
    #[arg(long, default_value = "", env = "API_SOLR_CORE")]
    pub solr_core: String,
    /// URL of the redis cache
    #[arg(long, default_value = "", env = "API_REDIS_HOST")]
    pub redis_host: String,
    /// Username for redis connections
    #[arg(long, default_value = "", env = "API_REDIS_USER")]
    pub redis_user: String,
    /// Password for redis connections
    #[arg(long, default_value = "", env = "API_REDIS_PASSWORD")]
    pub redis_password: String,
    /// Path to the public cert file for connections to the cache
    #[arg(long, env = "API_REDIS_SSL_CERTFILE")]
    pub redis_ssl_certfile: Option<String>,
    /// Path to the private key file for connections to the cache
    #[arg(long, env = "API_REDIS_SSL_KEYFILE")]
    pub redis_ssl_keyfile: Option<String>,
    /// OpenID connect discovery url
    #[arg(long, default_value = "", env = "API_OIDC_DISCOVERY_URL")]
    pub oidc_discovery_url: String,
    /// The OIDC client id used for authentication
    #[arg(long, default_value = "", env = "API_OIDC_CLIENT_ID")]
    pub oidc_client_id: String,
    /// The OIDC client secret, if any, used for authentication
    #[arg(long, default_value = "", env = "API_OIDC_CLIENT_SECRET")]
    pub oidc_client_secret: String,
    /// Token claim based filters in the format <key1.key2>:<pattern>,...
    /// Each filter matches if the decoded JWT contains the claim and its
    /// value matches the pattern. Nested claims are '.'-separated.
    #[arg(long, default_value = "", env = "API_OIDC_TOKEN_CLAIMS")]
    pub oidc_token_claims: String,
    /// Claim filters granting admin rights, same format as the token claims
    #[arg(long, default_value = "", env = "API_OIDC_ADMIN_CLAIMS")]
    pub oidc_admin_claims: String,
    /// Comma separated list of localhost ports that are valid redirect
    /// targets for the authorisation code flow
    #[arg(long, default_value = "", env = "API_OIDC_AUTH_PORTS")]
    pub oidc_auth_ports: String,
    /// Path to a .toml file holding fallback values for unset options
    #[arg(long, env = "API_CONFIG")]
    pub config: Option<String>,
    /// Turn on debug mode
    #[arg(long, default_value_t = false, env = "DEBUG")]
    pub debug: bool,
    /// Comma separated list of services that should be enabled
    /// (zarr-stream, databrowser, stacapi)
    #[arg(
        long,
        default_value = "databrowser,zarr-stream,stacapi",
        env = "API_SERVICES"
    )]
    pub services: String,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "API_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(long, env = "API_SSL_CERT_FILE")]
    pub cert_file: Option<String>,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(long, env = "API_SSL_KEY_FILE")]
    pub key_file: Option<String>,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "API_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
