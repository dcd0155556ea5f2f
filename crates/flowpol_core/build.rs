use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Header fields in bit order, lowest bits first. Each one can be compiled out by disabling the
/// cargo feature of the same name.
const FIELDS: [(&str, usize); 10] = [
    ("inport", 16),
    ("vlan", 16),
    ("ethtype", 16),
    ("protocol", 8),
    ("srcport", 16),
    ("dstport", 16),
    ("srcip", 32),
    ("dstip", 32),
    ("srcmac", 48),
    ("dstmac", 48),
];

fn main() {
    let path = Path::new(&env::var("OUT_DIR").unwrap()).join("codegen.rs");
    let mut file = BufWriter::new(File::create(&path).unwrap());
    let mut m: phf_codegen::OrderedMap<&'static str> = phf_codegen::OrderedMap::new();
    let mut counter: usize = 0;

    for (name, width) in FIELDS {
        let feature = format!("CARGO_FEATURE_{}", name.to_uppercase());
        if env::var_os(feature).is_none() {
            continue;
        }
        m.entry(
            name,
            format!("({}usize, {}usize)", counter, counter + width).as_str(),
        );
        counter += width;
    }

    write!(
        &mut file,
        "pub static FIELD_MAP: phf::OrderedMap<&'static str, (usize, usize)> = {}",
        m.build()
    )
    .unwrap();
    writeln!(&mut file, ";\n").unwrap();
    writeln!(&mut file, "pub const MAX_POS: usize = {}usize;\n", counter).unwrap();
    println!("cargo:rerun-if-changed=build.rs");
}
