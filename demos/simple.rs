use ndarray::prelude::*;
use npy_mmap::{npy_load, LoadMode, ReadNpyError, ReadNpyExt, WriteNpyError, WriteNpyExt};
use std::fs::File;
use std::io::BufWriter;

fn write_example() -> Result<(), WriteNpyError> {
    let arr: Array2<i32> = array![[1, 2, 3], [4, 5, 6]];
    let writer = BufWriter::new(File::create("array.npy")?);
    arr.write_npy(writer)?;
    Ok(())
}

fn read_example() -> Result<(), ReadNpyError> {
    let reader = File::open("array.npy")?;
    let arr = Array2::<i32>::read_npy(reader)?;
    println!("arr =\n{}", arr);
    Ok(())
}

fn mmap_example() -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = npy_load("array.npy", LoadMode::Mmap)?;
    buffer.view_mut::<i32>()?[[1, 2]] = 60;
    println!("mapped arr =\n{}", buffer.view::<i32>()?);
    Ok(())
}

fn main() {
    write_example().expect("failure writing array to file");
    read_example().expect("failure reading array from file");
    mmap_example().expect("failure mapping array file");
}
