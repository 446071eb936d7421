fn main() {
    std::process::exit(lofi_launcher_lib::run());
}
