fn main() {
    tubefeed_lib::run()
}
