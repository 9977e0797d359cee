use npy_mmap::new_npy_mmap;
use std::fs::File;
use std::io;

fn print_file_sizes(file: &File) -> io::Result<()> {
    println!("Size of backing file:");
    println!(
        "  Apparent size:\t{:.2} GiB",
        file.metadata()?.len() as f64 / (1 << 30) as f64
    );
    if cfg!(unix) {
        use std::os::unix::fs::MetadataExt;
        println!(
            "  Actual disk usage:\t{:.2} kiB",
            file.metadata()?.blocks() as f64 / 2.
        );
    } else {
        println!("Actual disk usage is unknown for this platform.");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = "array.npy";

    // Create a (sparse if supported) file containing 64 GiB of zeroed data
    // and map it read-write.
    println!("Creating the (sparse if supported) backing file...");
    let mut buffer = new_npy_mmap::<f64, _>(path, &[1024, 2048, 4096], false)?;
    print_file_sizes(&File::open(path)?)?;

    // Modify an element near the middle of the data.
    println!("Modifying an element near the middle of the data...");
    buffer.view_mut::<f64>()?[[500, 1000, 2000]] = 3.14;
    print_file_sizes(&File::open(path)?)?;

    Ok(())
}
