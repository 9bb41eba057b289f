fn main() {
    wb_rewind_lib::run()
}
