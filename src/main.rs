use env_logger::Env;

fn main() {
    env_logger::Builder::from_env(Env::new().filter_or("CHRONOS_LOG", "info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = chronos::app::run();
    std::process::exit(exit_code);
}
