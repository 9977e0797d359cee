use npy_mmap::{npz_load, npz_load_entry_as, npz_save, Compression, LoadMode, WriteMode};
use std::error::Error;

fn write_example() -> Result<(), Box<dyn Error>> {
    npz_save("arrays.npz", "a", &[1i32, 2, 3, 4, 5, 6], &[2, 3], WriteMode::Create, Compression::Stored)?;
    npz_save("arrays.npz", "b", &[7.5f64, 8.5, 9.5], &[3], WriteMode::Append, Compression::default())?;
    Ok(())
}

fn read_example() -> Result<(), Box<dyn Error>> {
    let arrays = npz_load("arrays.npz", LoadMode::MmapReadOnly)?;
    for (name, buffer) in arrays.iter() {
        println!(
            "{}: shape {:?}, descr {}, mapped: {}",
            name,
            buffer.shape(),
            buffer.descriptor(),
            buffer.is_mapped()
        );
    }
    let a = npz_load_entry_as::<i32, _>("arrays.npz", "a", LoadMode::Memory)?;
    println!("a =\n{}", a.to_array::<i32>()?);
    Ok(())
}

fn main() {
    write_example().expect("failure writing arrays to file");
    read_example().expect("failure reading arrays from file");
}
