use crate::context::GpuContext;
use crate::error::{BuildLog, DeviceBuildLog, Diagnostic, DiagnosticLevel, LinsolveError, Result};
use std::borrow::Cow;

/// WGSL source of the default Jacobi row-update kernel.
pub const JACOBI_ROW_KERNEL: &str = include_str!("shaders/jacobi_row.wgsl");
/// WGSL source of the row-parallel `y = A v` kernel.
pub const MAT_VEC_KERNEL: &str = include_str!("shaders/mat_vec.wgsl");
/// WGSL source of the steepest-descent update kernel.
pub const DESCENT_STEP_KERNEL: &str = include_str!("shaders/descent_step.wgsl");
/// WGSL source of the column-sweep back substitution kernel.
pub const BACK_SUBSTITUTION_KERNEL: &str = include_str!("shaders/back_substitution.wgsl");

/// Entry point every row-update kernel must expose.
pub const ROW_UPDATE_ENTRY_POINT: &str = "jacobi_row";

/// The kernels the dispatch layer knows how to launch.
///
/// Each one fixes an entry point and a binding layout: binding `0` is always
/// a 16-byte uniform of four `u32` (`n`, `cols`, `column`, `finalize`), the
/// storage buffers follow in kernel parameter order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// `x_next[i] = (b[i] - sum_{k != i} A[i,k] x_prev[k]) / A[i,i]`.
    /// Bindings: A, b, x_prev, x_next.
    JacobiRow,
    /// `y[i] = sum_k A[i,k] v[k]`. Bindings: A, v, y.
    MatVec,
    /// `s = (r.r)/(r.Ar)`, `x[i] += s r[i]`, `r_next[i] = r[i] - s Ar[i]`.
    /// Bindings: r, ar, x (read-write), r_next.
    DescentStep,
    /// One column of back substitution on an upper-triangular `U`, or the
    /// final division by the diagonal. Bindings: U, x (read-write).
    BackSubstitution,
}

impl Kernel {
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::JacobiRow => ROW_UPDATE_ENTRY_POINT,
            Kernel::MatVec => "mat_vec",
            Kernel::DescentStep => "descent_step",
            Kernel::BackSubstitution => "back_substitution",
        }
    }

    /// The WGSL shipped with the crate for this kernel.
    pub fn bundled_source(self) -> &'static str {
        match self {
            Kernel::JacobiRow => JACOBI_ROW_KERNEL,
            Kernel::MatVec => MAT_VEC_KERNEL,
            Kernel::DescentStep => DESCENT_STEP_KERNEL,
            Kernel::BackSubstitution => BACK_SUBSTITUTION_KERNEL,
        }
    }

    /// `read_only` flag of each storage binding, starting at binding 1.
    pub(crate) fn storage_bindings(self) -> &'static [bool] {
        match self {
            Kernel::JacobiRow => &[true, true, true, false],
            Kernel::MatVec => &[true, true, false],
            Kernel::DescentStep => &[true, true, false, false],
            Kernel::BackSubstitution => &[true, false],
        }
    }
}

/// A kernel built for one device.
///
/// Building is the expensive part of talking to the device, so a program is
/// compiled once and then shared read-only by every dispatch.
#[derive(Debug)]
pub struct CompiledProgram {
    pub(crate) kernel: Kernel,
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    build_log: BuildLog,
}

impl CompiledProgram {
    /// Warnings and informational messages produced by a successful build.
    pub fn build_log(&self) -> &BuildLog {
        &self.build_log
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn entry_point(&self) -> &'static str {
        self.kernel.entry_point()
    }

    /// Fails unless this program was built for `expected`.
    pub(crate) fn ensure_kernel(&self, expected: Kernel) -> Result<()> {
        if self.kernel != expected {
            return Err(LinsolveError::Dispatch(format!(
                "program built for {:?} cannot be launched as {:?}",
                self.kernel, expected
            )));
        }
        Ok(())
    }
}

fn uniform_entry() -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn to_diagnostic(message: &wgpu::CompilationMessage) -> Diagnostic {
    let level = match message.message_type {
        wgpu::CompilationMessageType::Error => DiagnosticLevel::Error,
        wgpu::CompilationMessageType::Warning => DiagnosticLevel::Warning,
        wgpu::CompilationMessageType::Info => DiagnosticLevel::Info,
    };
    Diagnostic {
        level,
        message: message.message.clone(),
        line: message.location.as_ref().map(|l| l.line_number),
        column: message.location.as_ref().map(|l| l.line_position),
    }
}

/// Builds `source` into a compute pipeline for `kernel`'s entry point and layout.
///
/// On failure the whole per-device log is returned.
pub(crate) async fn internal_compile(
    context: &GpuContext,
    kernel: Kernel,
    source: &str,
) -> Result<CompiledProgram> {
    let device = &context.device;
    log::info!("Compiling {:?} kernel for {}", kernel, context.device_name());

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.entry_point()),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
    });
    let compilation_info = shader_module.get_compilation_info().await;
    let mut diagnostics: Vec<Diagnostic> =
        compilation_info.messages.iter().map(to_diagnostic).collect();

    let entries: Vec<wgpu::BindGroupLayoutEntry> = std::iter::once(uniform_entry())
        .chain(
            kernel
                .storage_bindings()
                .iter()
                .enumerate()
                .map(|(i, &read_only)| storage_entry(i as u32 + 1, read_only)),
        )
        .collect();
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(kernel.entry_point()),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(kernel.entry_point()),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.entry_point()),
        layout: Some(&pipeline_layout),
        module: &shader_module,
        entry_point: Some(kernel.entry_point()),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });

    let scope_error = device.pop_error_scope().await;

    if !context.supports_f64() {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            message: "device was created without SHADER_F64".to_string(),
            line: None,
            column: None,
        });
    }
    if let Some(error) = scope_error {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            message: error.to_string(),
            line: None,
            column: None,
        });
    }

    let build_log = BuildLog {
        devices: vec![DeviceBuildLog {
            device: context.device_name(),
            diagnostics,
        }],
    };

    if build_log.has_errors() {
        log::error!("Kernel build failed:\n{}", build_log);
        return Err(LinsolveError::Compilation(build_log));
    }
    if !build_log.is_empty() {
        log::warn!("Kernel built with diagnostics:\n{}", build_log);
    }
    log::info!("{:?} kernel compiled", kernel);

    Ok(CompiledProgram {
        kernel,
        pipeline,
        bind_group_layout,
        build_log,
    })
}
