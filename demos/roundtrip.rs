use std::env::temp_dir;

use ini_table::{ParseOption, Table};

fn main() {
    let path = temp_dir().join("ini_table_roundtrip.ini");

    let mut conf = Table::new();
    conf.upsert_entry("", "general", "value");
    conf.with_section("User")
        .comment("; who owns this box")
        .set("name", "Raspberry")
        .set("value", "Pi");
    conf.with_section("Library")
        .set("name", "Sun Yat-sen U")
        .set("location", "Guangzhou=world");
    conf.write_to_file(&path).unwrap();

    let conf = Table::load_from_file(&path).unwrap();
    for (sec, entries) in conf.iter() {
        println!("Section: {:?}", sec);
        for (k, v) in entries.iter() {
            println!("{}:{}", k, v);
        }
    }
    println!();

    println!("conf[{}][{}]={}", "User", "name", &conf["User"]["name"]);

    let (_, diagnostics) = Table::parse_with_diagnostics("[Broken\nk = v\n", ParseOption::default()).unwrap();
    for diagnostic in diagnostics {
        println!("skipped: {}", diagnostic);
    }
}
