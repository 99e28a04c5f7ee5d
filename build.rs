// Build script to compile the demo's GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: &[&str] = &["shaders/quad.vert", "shaders/quad.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    for shader in SHADERS {
        compile_shader(shader, &format!("{shader}.spv"));
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
