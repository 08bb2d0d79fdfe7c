//  MAIN.rs
//    by Lut99
//
//  Created:
//    03 Mar 2025, 10:15:04
//  Last edited:
//    30 Jul 2025, 11:41:17
//  Auto updated?
//    Yes
//
//  Description:
//!   Entrypoint to the `weir-api` service.
//

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use error_trace::trace;
use log::{LevelFilter, error, info, warn};
use tokio::signal::unix::{Signal, SignalKind, signal};
use warp::Filter;
use warp::filters::BoxedFilter;
use warp::http::Response;
use warp::hyper::Body;
use weir_api::spec::Context;
use weir_api::{geoserver, health, jobs, processes};
use weir_cfg::watcher::ProvidersHandle;
use weir_jobs::client::ReqwestHttpClient;
use weir_jobs::manager::{JobManager, JobManagerConfig};
use weir_jobs::observers::ResultsPublicationObserver;
use weir_jobs::repository::{InMemoryInputsStore, InMemoryJobRepository};
use weir_jobs::retry::RetryPolicy;
use weir_jobs::spec::{HttpClient, JobObserver, JobRepository, Providers};


/***** ARGUMENTS *****/
#[derive(Parser)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Opts {
    /// Print debug info
    #[clap(short, long, env = "DEBUG")]
    debug: bool,

    /// The providers file declaring the upstream servers
    #[clap(short, long, default_value = "./providers.yaml", help = "The path to the providers file that declares the upstream OGC API - Processes servers and their process configuration.", env = "PROVIDERS_FILE")]
    providers_path: PathBuf,

    /// The address to bind the server to
    #[clap(short, long, default_value = "0.0.0.0:3000", env = "BIND_ADDRESS")]
    bind: SocketAddr,

    /// The URL prefix the API is mounted under
    #[clap(long, default_value = "/", env = "API_PREFIX")]
    prefix: String,

    /// The upper bound, in seconds, on the sleep between remote status polls
    #[clap(long, default_value = "5", env = "POLL_INTERVAL")]
    poll_interval: u64,

    /// The overall poll budget per job, in seconds; unbounded when omitted
    #[clap(long, env = "POLL_TIMEOUT")]
    poll_timeout: Option<f64>,

    /// Inputs up to this many serialized bytes are stored inline on the job
    #[clap(long, default_value = "65536", env = "INLINE_INPUTS_LIMIT")]
    inline_inputs_limit: usize,

    /// The base URL of the GeoServer to publish results into; publication is disabled when omitted
    #[clap(long, env = "GEOSERVER_URL")]
    geoserver_url: Option<String>,

    /// The GeoServer admin user
    #[clap(long, default_value = "geoserver", env = "GEOSERVER_USER")]
    geoserver_user: String,

    /// The GeoServer admin password
    #[clap(long, default_value = "geoserver", env = "GEOSERVER_PASSWORD")]
    geoserver_password: String,

    /// The GeoServer workspace result layers land in
    #[clap(long, default_value = "WEIR", env = "GEOSERVER_WORKSPACE")]
    geoserver_workspace: String,
}





/***** HELPER FUNCTIONS *****/
/// Builds the route tree of the API, mounted at the root.
fn routes(context: Arc<Context>) -> BoxedFilter<(Response<Body>,)> {
    let context = warp::any().map(move || context.clone());
    let headers = warp::header::headers_cloned();

    let execute = warp::path("processes")
        .and(warp::path::param())
        .and(warp::path("execution"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(context.clone())
        .and(headers.clone())
        .and_then(processes::execute);
    let get_process = warp::path("processes")
        .and(warp::path::param())
        .and(warp::path::end())
        .and(warp::get())
        .and(context.clone())
        .and(headers.clone())
        .and_then(processes::get);
    let list_processes =
        warp::path("processes").and(warp::path::end()).and(warp::get()).and(context.clone()).and(headers.clone()).and_then(processes::list);

    let get_results = warp::path("jobs")
        .and(warp::path::param())
        .and(warp::path("results"))
        .and(warp::path::end())
        .and(warp::get())
        .and(context.clone())
        .and(headers.clone())
        .and_then(jobs::results);
    let get_job =
        warp::path("jobs").and(warp::path::param()).and(warp::path::end()).and(warp::get()).and(context.clone()).and(headers.clone()).and_then(jobs::get);
    let list_jobs = warp::path("jobs")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(context.clone())
        .and(headers.clone())
        .and_then(jobs::list);

    let health = warp::path("health").and(warp::path::end()).and(warp::get()).and(context.clone()).and_then(health::handle);

    execute.or(get_process).unify().or(list_processes).unify().or(get_results).unify().or(get_job).unify().or(list_jobs).unify().or(health).unify().boxed()
}

/// Mounts the given routes under the configured prefix.
fn mount(prefix: &str, filter: BoxedFilter<(Response<Body>,)>) -> BoxedFilter<(Response<Body>,)> {
    let mut filter: BoxedFilter<(Response<Body>,)> = filter;
    for segment in prefix.split('/').filter(|segment| !segment.is_empty()).rev() {
        filter = warp::path(segment.to_string()).and(filter).boxed();
    }
    filter
}





/***** ENTRYPOINT *****/
#[tokio::main]
async fn main() {
    dotenv().ok();
    let opts = Opts::parse();

    // Configure logger.
    let mut logger = env_logger::builder();
    logger.format_module_path(false);

    if opts.debug {
        logger.filter_level(LevelFilter::Debug).init();
    } else {
        logger.filter_level(LevelFilter::Info).init();
    }
    info!("Initializing weir-api v{}...", env!("CARGO_PKG_VERSION"));

    // Load the providers file and start watching it for changes
    info!("Loading providers file '{}'...", opts.providers_path.display());
    let providers: ProvidersHandle = match ProvidersHandle::load(&opts.providers_path) {
        Ok(providers) => providers,
        Err(err) => {
            error!("{}", trace!(("Failed to load providers file '{}'", opts.providers_path.display()), err));
            std::process::exit(1);
        },
    };
    let _watcher = match providers.watch() {
        Ok(guard) => Some(guard),
        Err(err) => {
            warn!("{}", trace!(("Failed to watch providers file '{}'", opts.providers_path.display()), err));
            warn!("Changes to the providers file will NOT be picked up until restart");
            None
        },
    };

    // Assemble the core around its adapters
    let providers: Arc<dyn Providers> = Arc::new(providers);
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let repo: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());

    let mut extra_observers: Vec<Arc<dyn JobObserver>> = vec![];
    if let Some(geoserver_url) = &opts.geoserver_url {
        info!("Result publication enabled towards '{}' (workspace '{}')", geoserver_url, opts.geoserver_workspace);
        let publisher = Arc::new(geoserver::GeoserverPublisher::new(geoserver_url, &opts.geoserver_user, &opts.geoserver_password, &opts.geoserver_workspace));
        extra_observers.push(Arc::new(ResultsPublicationObserver::new(http.clone(), providers.clone(), publisher, repo.clone())));
    }

    let config: JobManagerConfig = JobManagerConfig {
        poll_interval: Duration::from_secs(opts.poll_interval),
        poll_timeout: opts.poll_timeout.map(Duration::from_secs_f64),
        inline_inputs_limit: opts.inline_inputs_limit,
        ..Default::default()
    };
    let manager: Arc<JobManager> =
        JobManager::start(providers.clone(), http.clone(), repo.clone(), Arc::new(InMemoryInputsStore::new()), RetryPolicy::default(), config, extra_observers);
    let process_manager: Arc<processes::ProcessManager> = Arc::new(processes::ProcessManager::new(providers.clone(), http.clone(), manager.clone()));

    let prefix: String = if opts.prefix.ends_with('/') { opts.prefix.clone() } else { format!("{}/", opts.prefix) };
    let context: Arc<Context> = Arc::new(Context {
        manager: manager.clone(),
        processes: process_manager,
        repo,
        providers,
        http,
        prefix,
    });

    // Configure Warp.
    let filter = mount(&opts.prefix, routes(context)).with(warp::log("weir-api"));

    // Run the server
    let handle = warp::serve(filter).try_bind_with_graceful_shutdown(opts.bind, async {
        // Register a SIGTERM handler to be Docker-friendly
        let mut handler: Signal = match signal(SignalKind::terminate()) {
            Ok(handler) => handler,
            Err(err) => {
                error!("{}", trace!(("Failed to register SIGTERM signal handler"), err));
                warn!("Service will NOT shutdown gracefully on SIGTERM");
                loop {
                    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                }
            },
        };

        // Wait until we receive such a signal after which we terminate the server
        handler.recv().await;
        info!("Received SIGTERM, shutting down gracefully...");
    });

    match handle {
        Ok((addr, srv)) => {
            info!("Now serving @ '{addr}'");
            srv.await;
        },
        Err(err) => {
            error!("{}", trace!(("Failed to serve at '{}'", opts.bind), err));
            std::process::exit(1);
        },
    }

    // The server is gone; wind down the poll loops
    manager.shutdown().await;
    info!("Bye.");
}
