fn main() {
    ambient_dash::run();
}
