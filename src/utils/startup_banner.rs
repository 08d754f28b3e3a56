pub fn print_startup_banner() {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;28m";
    const STAR_COLOR: &str = "\x1b[38;5;220m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const STAR: &str = "              *";
    const BANNER: &str = r#"
             /o\
            /o/o\
           /o/o/o\
          /o/o/o/o\
         /o/o/o/o/o\
               ||"#;
    const APP_DESCRIPTION: &str =
        "Addressable light-strip animation server driven by JSON commands over TCP.";

    println!("{STAR_COLOR}{STAR}{RESET}");
    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!();
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("TREELIGHTS_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}Protocol: 8-byte big-endian length prefix + JSON {{\"command\", \"args\"}}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
