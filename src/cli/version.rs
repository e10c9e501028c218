/// Display version information
pub fn execute() {
    println!("doorman {}", env!("CARGO_PKG_VERSION"));
    println!("Verification gatekeeper bot for closed chat groups");
}
