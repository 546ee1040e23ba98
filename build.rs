use std::env;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    // Tell Cargo to re-run this script if shaders change
    println!("cargo:rerun-if-changed=shaders");

    let out_dir = PathBuf::from(env::var("OUT_DIR")?).join("shaders");
    std::fs::create_dir_all(&out_dir)?;

    // The default shader provider looks here for `<program>.<kind>.spv` files.
    println!("cargo:rustc-env=PRISM_SHADER_DIR={}", out_dir.display());

    let sources: Vec<PathBuf> = glob::glob("shaders/*.vert")?
        .chain(glob::glob("shaders/*.frag")?)
        .collect::<Result<_, _>>()?;

    compile(&sources, &out_dir)
}

#[cfg(feature = "shader_compilation")]
fn compile(sources: &[PathBuf], out_dir: &std::path::Path) -> anyhow::Result<()> {
    use anyhow::Context;

    let compiler = shaderc::Compiler::new().context("shaderc compiler unavailable")?;

    for path in sources {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .context("shader file name is not valid UTF-8")?;

        let kind = if file_name.ends_with(".vert") {
            shaderc::ShaderKind::Vertex
        } else {
            shaderc::ShaderKind::Fragment
        };

        let source = std::fs::read_to_string(path)?;

        // Panic to fail build if shader error
        let binary = compiler
            .compile_into_spirv(&source, kind, file_name, "main", None)
            .unwrap_or_else(|e| panic!("Failed to compile shader {file_name}: {e}"));

        std::fs::write(out_dir.join(format!("{file_name}.spv")), binary.as_binary_u8())?;
    }

    Ok(())
}

#[cfg(not(feature = "shader_compilation"))]
fn compile(_sources: &[PathBuf], _out_dir: &std::path::Path) -> anyhow::Result<()> {
    // Precompiled SPIR-V is expected in `RendererConfig::shader_dir`.
    Ok(())
}
