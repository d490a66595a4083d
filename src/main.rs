fn main() {
    if let Err(err) = routekeeper_lib::run() {
        log::error!("routekeeper exited with error: {err:#}");
        std::process::exit(1);
    }
}
