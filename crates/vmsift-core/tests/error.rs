//! Tests for error handling

use vmsift_core::error::{SiftError, SiftResult};
use vmsift_core::types::Address;

#[test]
fn test_corrupt_data_display()
{
    let error = SiftError::corrupt(Address::from(0x1000), "class record with size 0");
    let message = format!("{}", error);
    assert!(message.contains("0x0000000000001000"));
    assert!(message.contains("size 0"));
}

#[test]
fn test_memory_fault_display()
{
    let error = SiftError::MemoryFault {
        address: Address::from(0xdead_0000),
        length: 8,
    };
    let message = format!("{}", error);
    assert!(message.contains("8 bytes"));
    assert!(message.contains("dead0000"));
}

#[test]
fn test_schema_errors_display()
{
    let error = SiftError::MissingField {
        structure: "JavaVM".to_string(),
        field: "threadLibrary".to_string(),
    };
    let message = format!("{}", error);
    assert!(message.contains("JavaVM"));
    assert!(message.contains("threadLibrary"));

    let error = SiftError::MissingStructure("MemTag".to_string());
    assert!(format!("{}", error).contains("MemTag"));
}

#[test]
fn test_corrupt_data_classification()
{
    assert!(SiftError::corrupt(Address::NULL, "bad").is_corrupt_data());
    assert!(SiftError::MemoryFault {
        address: Address::NULL,
        length: 1
    }
    .is_corrupt_data());
    assert!(SiftError::MissingStructure("Pool".into()).is_corrupt_data());
    assert!(!SiftError::NoMoreElements.is_corrupt_data());
    assert!(!SiftError::Unsupported("remove".into()).is_corrupt_data());
    assert!(!SiftError::Config("page size".into()).is_corrupt_data());
}

#[test]
fn test_error_address()
{
    let address = Address::from(0x4000);
    assert_eq!(SiftError::corrupt(address, "bad").address(), Some(address));
    assert_eq!(
        SiftError::MemoryFault { address, length: 4 }.address(),
        Some(address)
    );
    assert_eq!(SiftError::IllegalState("walker".into()).address(), None);
}

#[test]
fn test_result_type()
{
    fn test_function() -> SiftResult<u32>
    {
        Ok(42)
    }

    let result = test_function();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn test_result_error_propagation()
{
    fn failing() -> SiftResult<u32>
    {
        Err(SiftError::NoMoreElements)
    }

    fn outer() -> SiftResult<u32>
    {
        let value = failing()?;
        Ok(value + 1)
    }

    assert_eq!(outer(), Err(SiftError::NoMoreElements));
}
