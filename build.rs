fn main() {
    // Propagates ESP-IDF cfg symbols for device builds; inert on host builds.
    embuild::espidf::sysenv::output();
}
