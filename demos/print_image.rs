use kitty_print::{
    BleConnector, Config, JobPlan, PrintSession, TwoTonePixelBuffer, BLANK, INK, PRINTER_WIDTH,
};
use std::env;

//
// KITTY_DEVICE=GB02 cargo run --features ble --example print_image -- image photo.png
//

fn print_usage() {
    println!("Usage: cargo run --features ble --example print_image [OPTION]");
    println!("Options:");
    println!("  test       Checkerboard and stripes test strip");
    println!("  image      Load an image, threshold it and print (requires image file path)");
    println!("\nThe printer is read from KITTY_DEVICE (a .env file works too).");
    println!("If no option is provided, 'test' is used as default.");
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{}:{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();

    let args: Vec<String> = env::args().collect();
    let option = args.get(1).map(String::as_str).unwrap_or("test");
    if option == "--help" || option == "-h" {
        print_usage();
        return;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration settings: {}", err);
            print_usage();
            return;
        }
    };

    let plan: JobPlan = match option {
        "test" => vec![create_test_pattern(), create_stripes()].into_iter().collect(),
        "image" => {
            let Some(path) = args.get(2) else {
                eprintln!("Error: Image file path required");
                eprintln!("Usage: cargo run --features ble --example print_image image <path>");
                return;
            };
            match load_and_threshold_image(path) {
                Ok(buffer) => vec![buffer].into_iter().collect(),
                Err(e) => {
                    eprintln!("Failed to load/convert image: {}", e);
                    return;
                }
            }
        }
        _ => {
            eprintln!("Error: Unknown option '{}'", option);
            print_usage();
            return;
        }
    };

    println!("Printing {} items on {}...", plan.len(), config.device());
    let session = PrintSession::new(config);
    match session.print(&BleConnector::new(), plan).await {
        Ok(report) => println!(
            "Print completed: {} rows drawn, {} rows fed",
            report.rows_drawn, report.rows_fed
        ),
        Err(e) => eprintln!("Print failed ({:?}): {}", e.category(), e),
    }
}

fn create_test_pattern() -> TwoTonePixelBuffer {
    let width = PRINTER_WIDTH;
    let height = 96;

    let mut samples = vec![BLANK; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            if (x / 24 + y / 24) % 2 == 0 {
                samples[(y * width + x) as usize] = INK;
            }
        }
    }
    TwoTonePixelBuffer::new(width, height, samples).expect("Failed to create test pattern")
}

fn create_stripes() -> TwoTonePixelBuffer {
    let width = PRINTER_WIDTH;
    let height = 64;

    // Stripes every 8 rows, with blank rows between that only feed paper
    let samples = (0..height)
        .flat_map(|y| {
            let sample = if (y / 8) % 2 == 0 { INK } else { BLANK };
            std::iter::repeat(sample).take(width as usize)
        })
        .collect();
    TwoTonePixelBuffer::new(width, height, samples).expect("Failed to create stripes")
}

fn load_and_threshold_image(path: &str) -> Result<TwoTonePixelBuffer, String> {
    let img = image::open(path).map_err(|e| format!("Failed to open image: {}", e))?;
    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();

    println!("Loading image: {}x{} pixels", width, height);

    // Resize to fit printer width
    let luma = if width != PRINTER_WIDTH {
        let aspect_ratio = height as f32 / width as f32;
        let new_height = ((PRINTER_WIDTH as f32 * aspect_ratio) as u32).max(1);

        println!(
            "Resizing image to {}x{} to fit printer",
            PRINTER_WIDTH, new_height
        );

        image::imageops::resize(
            &luma,
            PRINTER_WIDTH,
            new_height,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        luma
    };

    let (width, height) = luma.dimensions();
    let samples = luma
        .into_raw()
        .into_iter()
        .map(|v| if v < 128 { INK } else { BLANK })
        .collect();

    TwoTonePixelBuffer::new(width, height, samples).map_err(|e| e.to_string())
}
