// Internal implementation of device launches. Called through `GpuDevice`.

use crate::{
    buffer::DeviceBuffer,
    context::GpuContext,
    dense::DenseMatrix,
    error::{LinsolveError, Result},
    program::{CompiledProgram, Kernel},
    traits::Matrix,
};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Binding 0 of every kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LaunchParams {
    n: u32,
    cols: u32,
    column: u32,
    finalize: u32,
}

impl LaunchParams {
    fn rows(n: u32, cols: u32) -> Self {
        Self {
            n,
            cols,
            column: 0,
            finalize: 0,
        }
    }
}

/// One compute pass: its uniform and the number of work-items (one per workgroup).
struct Pass {
    params: LaunchParams,
    groups: u32,
}

/// Runs `f` with validation and out-of-memory error scopes pushed, turning any
/// captured device error into `LinsolveError::Dispatch`.
async fn capture_device_errors<T>(
    device: &wgpu::Device,
    what: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = f();
    let validation = device.pop_error_scope().await;
    let out_of_memory = device.pop_error_scope().await;
    if let Some(error) = validation.or(out_of_memory) {
        log::error!("{} failed on device: {}", what, error);
        return Err(LinsolveError::Dispatch(format!("{}: {}", what, error)));
    }
    result
}

/// `n` as a 1-D grid size, checked against the device's per-dimension limit.
fn grid_size(context: &GpuContext, n: usize) -> Result<u32> {
    let max_groups = context.device.limits().max_compute_workgroups_per_dimension;
    match u32::try_from(n) {
        Ok(groups) if groups <= max_groups => Ok(groups),
        _ => Err(LinsolveError::Dispatch(format!(
            "grid of {} work-items exceeds the device limit of {} per dimension",
            n, max_groups
        ))),
    }
}

/// Encodes `passes` in order into one command buffer and submits it.
///
/// Storage buffers are bound positionally from binding 1. Returns the uniform
/// buffers, which must stay alive until the submission has completed.
fn encode_and_submit(
    context: &GpuContext,
    program: &CompiledProgram,
    storage: &[&DeviceBuffer],
    passes: &[Pass],
) -> Vec<wgpu::Buffer> {
    let device = &context.device;
    let label = program.entry_point();
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });

    let mut uniforms = Vec::with_capacity(passes.len());
    for pass in passes {
        let uniform = context.upload(
            label,
            bytemuck::bytes_of(&pass.params),
            wgpu::BufferUsages::UNIFORM,
        );
        let bind_group = {
            let entries: Vec<wgpu::BindGroupEntry> = std::iter::once(wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            })
            .chain(storage.iter().enumerate().map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: buffer.as_entire_binding(),
            }))
            .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &program.bind_group_layout,
                entries: &entries,
            })
        };

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&program.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            // Workgroup size is 1, so one workgroup per row.
            compute_pass.dispatch_workgroups(pass.groups, 1, 1);
        }
        uniforms.push(uniform);
    }

    context.queue.submit(std::iter::once(encoder.finish()));
    uniforms
}

fn require_square(a: &DenseMatrix, what: &str) -> Result<usize> {
    let (rows, cols) = a.dims();
    if rows != cols {
        return Err(LinsolveError::InvalidDimensions(format!(
            "{}: matrix must be square (dims: {}x{})",
            what, rows, cols
        )));
    }
    if rows == 0 {
        return Err(LinsolveError::EmptyInput(format!(
            "{} needs at least one row",
            what
        )));
    }
    Ok(rows)
}

fn require_lengths(what: &str, n: usize, vectors: &[(&str, &[f64])]) -> Result<()> {
    for (name, v) in vectors {
        if v.len() != n {
            return Err(LinsolveError::InvalidDimensions(format!(
                "{}: vector {} has length {}, expected {}",
                what,
                name,
                v.len(),
                n
            )));
        }
    }
    Ok(())
}

fn validate_row_update(a: &DenseMatrix, b: &[f64], x_prev: &[f64]) -> Result<usize> {
    let n = require_square(a, "row update")?;
    require_lengths("row update", n, &[("b", b), ("x_prev", x_prev)])?;
    Ok(n)
}

/// One Jacobi sweep on the device: uploads the operands, launches `n` work-items
/// of one row each, waits, and copies `x_next` back to the host.
///
/// Every buffer is created for this call and dropped before it returns.
pub(crate) async fn internal_row_update(
    context: &Arc<GpuContext>,
    program: &CompiledProgram,
    a: &DenseMatrix,
    b: &[f64],
    x_prev: &[f64],
) -> Result<Vec<f64>> {
    program.ensure_kernel(Kernel::JacobiRow)?;
    let n = validate_row_update(a, b, x_prev)?;
    let grid = grid_size(context, n)?;
    log::debug!("Dispatching row update over {} work-items", grid);

    let (_operands, x_next) = capture_device_errors(&context.device, "Row update launch", || {
        let a_buf = DeviceBuffer::upload(context, "A", a.data())?;
        let b_buf = DeviceBuffer::upload(context, "b", b)?;
        let x_prev_buf = DeviceBuffer::upload(context, "x_prev", x_prev)?;
        let x_next_buf = DeviceBuffer::output(context, "x_next", n)?;
        let uniforms = encode_and_submit(
            context,
            program,
            &[&a_buf, &b_buf, &x_prev_buf, &x_next_buf],
            &[Pass {
                params: LaunchParams::rows(grid, grid),
                groups: grid,
            }],
        );
        Ok(((uniforms, a_buf, b_buf, x_prev_buf), x_next_buf))
    })
    .await?;

    context.wait_idle()?;
    let result = x_next.read_contents().await?;
    log::trace!("Row update read back {} values", result.len());
    Ok(result)
}

/// `y = A v` with one work-item per row of `a`.
pub(crate) async fn internal_mat_vec(
    context: &Arc<GpuContext>,
    program: &CompiledProgram,
    a: &DenseMatrix,
    v: &[f64],
) -> Result<Vec<f64>> {
    program.ensure_kernel(Kernel::MatVec)?;
    let (rows, cols) = a.dims();
    if rows == 0 || cols == 0 {
        return Err(LinsolveError::EmptyInput(format!(
            "mat-vec needs a non-empty matrix (dims: {}x{})",
            rows, cols
        )));
    }
    require_lengths("mat-vec", cols, &[("v", v)])?;
    let grid = grid_size(context, rows)?;
    let cols = u32::try_from(cols).map_err(|_| {
        LinsolveError::InvalidDimensions(format!("{} columns do not fit a launch", cols))
    })?;

    let (_operands, y) = capture_device_errors(&context.device, "Mat-vec launch", || {
        let a_buf = DeviceBuffer::upload(context, "A", a.data())?;
        let v_buf = DeviceBuffer::upload(context, "v", v)?;
        let y_buf = DeviceBuffer::output(context, "y", rows)?;
        let uniforms = encode_and_submit(
            context,
            program,
            &[&a_buf, &v_buf, &y_buf],
            &[Pass {
                params: LaunchParams::rows(grid, cols),
                groups: grid,
            }],
        );
        Ok(((uniforms, a_buf, v_buf), y_buf))
    })
    .await?;

    context.wait_idle()?;
    y.read_contents().await
}

/// One steepest-descent update. Returns `(x_next, r_next)`.
pub(crate) async fn internal_descent_step(
    context: &Arc<GpuContext>,
    program: &CompiledProgram,
    r: &[f64],
    ar: &[f64],
    x: &[f64],
) -> Result<(Vec<f64>, Vec<f64>)> {
    program.ensure_kernel(Kernel::DescentStep)?;
    let n = r.len();
    if n == 0 {
        return Err(LinsolveError::EmptyInput(
            "descent step needs at least one row".to_string(),
        ));
    }
    require_lengths("descent step", n, &[("ar", ar), ("x", x)])?;
    let grid = grid_size(context, n)?;

    let (_operands, (x_buf, r_next)) =
        capture_device_errors(&context.device, "Descent step launch", || {
            let r_buf = DeviceBuffer::upload(context, "r", r)?;
            let ar_buf = DeviceBuffer::upload(context, "Ar", ar)?;
            let x_buf = DeviceBuffer::upload_mut(context, "x", x)?;
            let r_next_buf = DeviceBuffer::output(context, "r_next", n)?;
            let uniforms = encode_and_submit(
                context,
                program,
                &[&r_buf, &ar_buf, &x_buf, &r_next_buf],
                &[Pass {
                    params: LaunchParams::rows(grid, grid),
                    groups: grid,
                }],
            );
            Ok(((uniforms, r_buf, ar_buf), (x_buf, r_next_buf)))
        })
        .await?;

    context.wait_idle()?;
    let x_next = x_buf.read_contents().await?;
    let r_next = r_next.read_contents().await?;
    Ok((x_next, r_next))
}

/// Solves `U x = y` for upper-triangular `U`: one pass per column from the
/// last to the second, then one pass dividing by the diagonal. All passes
/// go out in a single submission.
pub(crate) async fn internal_back_substitute(
    context: &Arc<GpuContext>,
    program: &CompiledProgram,
    u: &DenseMatrix,
    y: &[f64],
) -> Result<Vec<f64>> {
    program.ensure_kernel(Kernel::BackSubstitution)?;
    let n = require_square(u, "back substitution")?;
    require_lengths("back substitution", n, &[("y", y)])?;
    u.check_diagonal()?;
    let grid = grid_size(context, n)?;

    let passes: Vec<Pass> = (1..grid)
        .rev()
        .map(|column| Pass {
            params: LaunchParams {
                column,
                ..LaunchParams::rows(grid, grid)
            },
            groups: column,
        })
        .chain(std::iter::once(Pass {
            params: LaunchParams {
                finalize: 1,
                ..LaunchParams::rows(grid, grid)
            },
            groups: grid,
        }))
        .collect();
    log::debug!("Back substitution: {} passes over n = {}", passes.len(), n);

    let (_operands, x) = capture_device_errors(&context.device, "Back substitution launch", || {
        let u_buf = DeviceBuffer::upload(context, "U", u.data())?;
        let x_buf = DeviceBuffer::upload_mut(context, "x", y)?;
        let uniforms = encode_and_submit(context, program, &[&u_buf, &x_buf], &passes);
        Ok(((uniforms, u_buf), x_buf))
    })
    .await?;

    context.wait_idle()?;
    x.read_contents().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_row_update_dimensions() {
        let a = DenseMatrix::identity(3);
        assert_eq!(validate_row_update(&a, &[1.0; 3], &[0.0; 3]).unwrap(), 3);
        assert!(matches!(
            validate_row_update(&a, &[1.0; 2], &[0.0; 3]),
            Err(LinsolveError::InvalidDimensions(_))
        ));
        assert!(matches!(
            validate_row_update(&DenseMatrix::zeros(2, 3), &[1.0; 2], &[0.0; 2]),
            Err(LinsolveError::InvalidDimensions(_))
        ));
        assert!(matches!(
            validate_row_update(&DenseMatrix::zeros(0, 0), &[], &[]),
            Err(LinsolveError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_require_lengths_names_the_offender() {
        let err = require_lengths("descent step", 3, &[("ar", &[1.0; 3][..]), ("x", &[0.0; 2][..])])
            .unwrap_err()
            .to_string();
        assert!(err.contains("vector x has length 2, expected 3"), "{}", err);
    }

    #[test]
    fn test_params_layout_is_uniform_sized() {
        assert_eq!(std::mem::size_of::<LaunchParams>(), 16);
        let params = LaunchParams {
            column: 7,
            ..LaunchParams::rows(10, 10)
        };
        assert_eq!(bytemuck::cast::<LaunchParams, [u32; 4]>(params), [10, 10, 7, 0]);
    }
}
