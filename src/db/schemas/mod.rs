//! MongoDB document schemas
//!
//! One module per collection. Every document embeds [`Metadata`] and
//! implements `IntoIndexes` and `MutMetadata`.

pub mod audit_log;
pub mod certificate;
pub mod course;
pub mod enrollment;
pub mod inquiry;
pub mod instructor;
pub mod metadata;
pub mod payment;
pub mod result;
pub mod student;
pub mod testimonial;
pub mod user;

pub use audit_log::{AuditLogDoc, AUDIT_LOG_COLLECTION};
pub use certificate::{generate_certificate_number, CertificateDoc, CERTIFICATE_COLLECTION};
pub use course::{slugify, CourseDoc, VehicleType, COURSE_COLLECTION};
pub use enrollment::{EnrollmentDoc, EnrollmentStatus, PaymentStatus, ENROLLMENT_COLLECTION};
pub use inquiry::{InquiryDoc, InquiryStatus, INQUIRY_COLLECTION};
pub use instructor::{InstructorDoc, INSTRUCTOR_COLLECTION};
pub use metadata::Metadata;
pub use payment::{PaymentDoc, PaymentProvider, PaymentState, PAYMENT_COLLECTION};
pub use result::{ResultDoc, TestType, RESULT_COLLECTION};
pub use student::{StudentDoc, STUDENT_COLLECTION};
pub use testimonial::{TestimonialDoc, TESTIMONIAL_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
