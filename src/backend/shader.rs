// Shader module loading
//
// Shaders are compiled to SPIR-V ahead of time (build.rs runs glslc); this
// module reads the .spv files and wraps them in VkShaderModules.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

pub const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage implied by a shader file name. A trailing `.spv` is
/// ignored, so `quad.frag` and `quad.frag.spv` both map to FRAGMENT.
pub fn stage_from_file_name(path: &Path) -> vk::ShaderStageFlags {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".spv").unwrap_or(&name);

    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("vert") => vk::ShaderStageFlags::VERTEX,
        Some("frag") => vk::ShaderStageFlags::FRAGMENT,
        Some("geom") => vk::ShaderStageFlags::GEOMETRY,
        Some("comp") => vk::ShaderStageFlags::COMPUTE,
        Some("tesc") => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        Some("tese") => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        _ => vk::ShaderStageFlags::VERTEX,
    }
}

/// Create a shader module from SPIR-V bytes. Alignment and endianness are
/// handled by `read_spv`.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V")?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// A shader module and the stage it was built for
#[derive(Debug, Clone, Copy)]
pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Load `<file>.spv`, or `file` itself when it already ends in `.spv`
    pub fn from_file(device: &VulkanDevice, path: impl AsRef<Path>) -> Result<Self> {
        let path = spv_path(path.as_ref());
        let code = std::fs::read(&path)
            .with_context(|| format!("Failed to read shader {}", path.display()))?;
        let handle = create_shader_module(device, &code)
            .with_context(|| format!("Failed to load shader {}", path.display()))?;

        log::debug!("Loaded shader {} ({} bytes)", path.display(), code.len());
        Ok(Self {
            handle,
            stage: stage_from_file_name(&path),
        })
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        stage_info(self.handle, self.stage, ENTRY_POINT)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_shader_module(self.handle, None) };
    }
}

pub fn stage_info(
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry: &CStr,
) -> vk::PipelineShaderStageCreateInfo {
    vk::PipelineShaderStageCreateInfo::builder()
        .stage(stage)
        .module(module)
        .name(entry)
        .build()
}

pub fn spv_path(path: &Path) -> std::path::PathBuf {
    if path.extension().is_some_and(|e| e == "spv") {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".spv");
        name.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_from_extensions() {
        let cases = [
            ("shaders/quad.vert", vk::ShaderStageFlags::VERTEX),
            ("shaders/quad.frag", vk::ShaderStageFlags::FRAGMENT),
            ("shaders/quad.frag.spv", vk::ShaderStageFlags::FRAGMENT),
            ("grass.geom", vk::ShaderStageFlags::GEOMETRY),
            ("cull.comp.spv", vk::ShaderStageFlags::COMPUTE),
            ("terrain.tesc", vk::ShaderStageFlags::TESSELLATION_CONTROL),
            ("terrain.tese", vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        ];
        for (file, stage) in cases {
            assert_eq!(stage_from_file_name(Path::new(file)), stage, "{}", file);
        }
    }

    #[test]
    fn unknown_extension_defaults_to_vertex() {
        assert_eq!(stage_from_file_name(Path::new("shader.glsl")), vk::ShaderStageFlags::VERTEX);
        assert_eq!(stage_from_file_name(Path::new("noext")), vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn spv_suffix_added_once() {
        assert_eq!(spv_path(Path::new("a/b.vert")), Path::new("a/b.vert.spv"));
        assert_eq!(spv_path(Path::new("a/b.vert.spv")), Path::new("a/b.vert.spv"));
    }

    #[test]
    fn stage_info_uses_main() {
        let info = stage_info(vk::ShaderModule::null(), vk::ShaderStageFlags::COMPUTE, ENTRY_POINT);
        assert_eq!(info.stage, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(unsafe { CStr::from_ptr(info.p_name) }, ENTRY_POINT);
    }
}
