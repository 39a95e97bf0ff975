//! Mapping of rdkafka errors onto the kafka-bridge error type.

use kafka_bridge_types::Error;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

pub(crate) fn map_kafka_error(err: &KafkaError) -> Error {
    match err {
        KafkaError::ClientConfig(_, description, key, value) => {
            Error::Configuration(format!("Invalid value '{value}' for '{key}': {description}"))
        }
        KafkaError::ClientCreation(reason) => Error::Configuration(reason.clone()),
        KafkaError::Canceled => Error::Cancelled,
        KafkaError::MessageProduction(code) => map_error_code(*code, err),
        _ => match err.rdkafka_error_code() {
            Some(code) => map_error_code(code, err),
            None => Error::Native(err.to_string()),
        },
    }
}

fn map_error_code(code: RDKafkaErrorCode, err: &KafkaError) -> Error {
    match code {
        RDKafkaErrorCode::QueueFull => Error::QueueFull,
        RDKafkaErrorCode::InvalidTopic
        | RDKafkaErrorCode::UnknownTopic
        | RDKafkaErrorCode::UnknownPartition => Error::Configuration(err.to_string()),
        _ => Error::broker(format!("{code:?}"), err.to_string()),
    }
}

pub(crate) fn is_fatal(err: &KafkaError) -> bool {
    matches!(err.rdkafka_error_code(), Some(RDKafkaErrorCode::Fatal))
}
