fn main() {
    // Host builds (tests, portal-host) need no ESP-IDF environment.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") || target.ends_with("-espidf") {
        embuild::espidf::sysenv::output();
    }
}
