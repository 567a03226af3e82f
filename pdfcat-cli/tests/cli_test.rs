//! Integration tests driving [`pdfcat_cli::run`] directly against a
//! hand-built PDF fixture, without spawning the compiled binary.

use std::path::PathBuf;

use pdfcat_cli::{run, Cli};

fn one_page_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let objs: [(u32, &str); 2] = [
        (1, "<< /Type /Catalog /Pages 2 0 R >>"),
        (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
    ];
    let mut offsets = std::collections::HashMap::new();
    for (num, body) in objs {
        offsets.insert(num, out.len() as u64);
        out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
        out.extend_from_slice(body.as_bytes());
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len() as u64;
    out.extend_from_slice(b"xref\n0 3\n0000000000 65535 f \n");
    for n in 1..3u32 {
        out.extend_from_slice(format!("{:010} 00000 n \n", offsets[&n]).as_bytes());
    }
    out.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\n");
    out.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF").as_bytes());
    out
}

fn write_temp(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn cleanup(paths: &[&PathBuf]) {
    for p in paths {
        let _ = std::fs::remove_file(p);
    }
}

#[test]
fn successful_concat_writes_output() {
    let input = write_temp("pdfcat_cli_test_ok_input.pdf", &one_page_pdf());
    let output = std::env::temp_dir().join("pdfcat_cli_test_ok_output.pdf");
    let _ = std::fs::remove_file(&output);

    let cli = Cli { output: output.clone(), inputs: vec![input.clone()], verbose: 0 };
    run(&cli).unwrap();

    let written = std::fs::read(&output).unwrap();
    assert!(written.starts_with(b"%PDF-1.4\n"));
    assert!(String::from_utf8_lossy(&written).contains("startxref"));

    cleanup(&[&input, &output]);
}

#[test]
fn output_matching_input_is_rejected() {
    let input = write_temp("pdfcat_cli_test_clobber.pdf", &one_page_pdf());

    let cli = Cli { output: input.clone(), inputs: vec![input.clone()], verbose: 0 };
    let err = run(&cli).unwrap_err();

    assert_eq!(err.exit_code(), 4);
    cleanup(&[&input]);
}

#[test]
fn unwritable_output_directory_is_reported() {
    let input = write_temp("pdfcat_cli_test_badout_input.pdf", &one_page_pdf());
    let output = PathBuf::from("/nonexistent-pdfcat-test-dir/out.pdf");

    let cli = Cli { output, inputs: vec![input.clone()], verbose: 0 };
    let err = run(&cli).unwrap_err();

    assert_eq!(err.exit_code(), 5);
    cleanup(&[&input]);
}

#[test]
fn malformed_input_propagates_core_exit_code() {
    let input = write_temp(
        "pdfcat_cli_test_malformed_input.pdf",
        b"not a pdf at all, just padding to clear the minimum size check....",
    );
    let output = std::env::temp_dir().join("pdfcat_cli_test_malformed_output.pdf");
    let _ = std::fs::remove_file(&output);

    let cli = Cli { output: output.clone(), inputs: vec![input.clone()], verbose: 0 };
    let err = run(&cli).unwrap_err();

    assert_eq!(err.exit_code(), 3);
    cleanup(&[&input, &output]);
}
