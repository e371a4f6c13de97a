use pixpipe::prelude::*;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn main() -> Result<(), PlanningError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Portrait RGB preview of a landscape YUYV camera, mirrored like a selfie view.
    let request = ConversionRequest::new(PixelFormat::Yuyv, WIDTH, HEIGHT, PixelFormat::Rgb24, HEIGHT, WIDTH)
        .rotation(90)
        .hflip(true);
    let planner = Planner::builtin();
    let registered = planner.registry().list_registered();
    let from_yuyv = registered.iter().filter(|d| d.src == PixelFormat::Yuyv).count();
    println!("{} prototypes registered, {from_yuyv} accept YUYV", registered.len());

    let plan = planner.search(&request)?;
    println!(
        "plan cost={} quality={:.3} score={:.2} expanded={}",
        plan.cost, plan.quality, plan.score, plan.expanded
    );
    println!("{}", plan.describe());

    let mut pipeline = planner.bind(plan)?;
    let (scratch_a, scratch_b) = pipeline.scratch_capacity();
    println!("scratch A={scratch_a} B={scratch_b} bytes");

    let mut output = vec![0u8; pipeline.dst_len()];
    for frame in 0..4u8 {
        let input = synthetic_yuyv(frame);
        match pipeline.try_apply(&input, &mut output) {
            Ok(written) => println!("frame {frame}: {written} bytes, first pixel {:?}", &output[..3]),
            Err(err) => println!("frame {frame}: {err}"),
        }
    }

    let counters = pipeline.counters();
    println!(
        "frames={} failures={} bytes={}",
        counters.frames(),
        counters.failures(),
        counters.bytes()
    );
    pipeline.release();
    Ok(())
}

/// Horizontal luma ramp with a chroma tint that shifts per frame.
fn synthetic_yuyv(frame: u8) -> Vec<u8> {
    let width = WIDTH as usize;
    let mut data = vec![0u8; width * HEIGHT as usize * 2];
    for row in data.chunks_exact_mut(width * 2) {
        for (pair, px) in row.chunks_exact_mut(4).enumerate() {
            let luma = (pair * 2 * 255 / width) as u8;
            px.copy_from_slice(&[luma, 128u8.wrapping_add(frame * 16), luma, 128u8.wrapping_sub(frame * 16)]);
        }
    }
    data
}
